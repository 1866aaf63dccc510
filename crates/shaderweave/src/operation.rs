//! Composable trees of shader units
//!
//! An [`Operation`] is built from constructors (closures that need the backend to produce a
//! unit), already materialised units, and concatenations of both. `+` is associative with the
//! empty operation as identity; adding two operations of the same flat kind appends the lists
//! directly instead of nesting a concatenation.
//!
//! The first resolve flattens the tree depth-first, left to right, and replaces it with the flat
//! list of units so later submissions (for example every frame of a redraw loop) neither walk
//! the tree nor call any constructor again.

use std::fmt;
use std::ops::{Add, AddAssign};

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::shader::{CustomUnit, EncodeContext, ShaderUnit};
use crate::Result;

/// Builds a shader unit once the backend is available
pub type Constructor<B> = Box<dyn Fn(&B) -> Result<ShaderUnit<B>> + Send + Sync>;

/// An ordered tree of GPU work
pub enum Operation<B: Backend> {
    /// Units that still have to be constructed
    Constructors(Vec<Constructor<B>>),
    /// Units ready to encode
    Materialized(Vec<ShaderUnit<B>>),
    /// `left` followed by `right`
    Concat(Box<Operation<B>>, Box<Operation<B>>),
}

impl<B: Backend> Operation<B> {
    /// The identity of `+`
    pub fn empty() -> Self {
        Self::Materialized(Vec::new())
    }

    /// A single materialised unit
    pub fn unit(unit: impl Into<ShaderUnit<B>>) -> Self {
        Self::Materialized(vec![unit.into()])
    }

    /// A single unit built from the backend on first resolve
    pub fn constructor<F, U>(build: F) -> Self
    where
        F: Fn(&B) -> Result<U> + Send + Sync + 'static,
        U: Into<ShaderUnit<B>>,
    {
        let constructor: Constructor<B> = Box::new(move |backend: &B| build(backend).map(Into::into));
        Self::Constructors(vec![constructor])
    }

    /// A unit that records commands through `encode` on every submission
    pub fn encode_with<F>(label: impl Into<String>, encode: F) -> Self
    where
        F: Fn(&B, &mut B::CommandBuffer) -> Result<()> + Send + Sync + 'static,
    {
        Self::unit(CustomUnit::new(label, encode))
    }

    /// Concatenates `operations` in order
    pub fn sequence(operations: impl IntoIterator<Item = Operation<B>>) -> Self {
        operations.into_iter().fold(Self::empty(), Add::add)
    }

    /// Whether the tree has already been flattened
    pub fn is_materialized(&self) -> bool {
        matches!(self, Self::Materialized(_))
    }

    /// The flat unit list, if the tree has been flattened
    pub fn units(&self) -> Option<&[ShaderUnit<B>]> {
        match self {
            Self::Materialized(units) => Some(units),
            _ => None,
        }
    }

    /// Flattens the tree into its ordered unit list, constructing units as needed
    ///
    /// On failure the units built so far are kept, so a retry only runs the constructors that
    /// have not succeeded yet.
    ///
    /// # Arguments
    /// * `backend` - Backend handed to every constructor
    ///
    /// # Returns
    /// The flat list of units in encode order
    pub fn resolve(&mut self, backend: &B) -> Result<&mut [ShaderUnit<B>]> {
        if !self.is_materialized() {
            self.materialize(backend)?;
            debug!(units = self.units().map_or(0, <[_]>::len), "flattened operation tree");
        }

        match self {
            Self::Materialized(units) => Ok(units.as_mut_slice()),
            _ => unreachable!("operation tree not flat after materialize"),
        }
    }

    fn materialize(&mut self, backend: &B) -> Result<()> {
        match self {
            Self::Materialized(_) => Ok(()),
            Self::Constructors(constructors) => {
                let mut units = Vec::with_capacity(constructors.len());
                let mut failure = None;
                for constructor in constructors.iter() {
                    match constructor(backend) {
                        Ok(unit) => units.push(unit),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }

                match failure {
                    None => {
                        *self = Self::Materialized(units);
                        Ok(())
                    }
                    Some(err) => {
                        if !units.is_empty() {
                            let remaining = constructors.split_off(units.len());
                            *self = Self::Concat(Box::new(Self::Materialized(units)), Box::new(Self::Constructors(remaining)));
                        }
                        Err(err)
                    }
                }
            }
            Self::Concat(left, right) => {
                left.materialize(backend)?;
                right.materialize(backend)?;
                let left = std::mem::take(left.as_mut());
                let right = std::mem::take(right.as_mut());
                *self = left + right;
                Ok(())
            }
        }
    }

    /// Flattens the tree if needed and records every unit in order
    ///
    /// # Arguments
    /// * `backend` - Backend used for construction and resolution
    /// * `encoder` - Command buffer being recorded
    /// * `context` - Settings shared by all units, including the frame target
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer, context: &EncodeContext<'_, B>) -> Result<()> {
        for unit in self.resolve(backend)? {
            trace!(unit = unit.label(), "encoding unit");
            unit.encode(backend, encoder, context)?;
        }
        Ok(())
    }
}

impl<B: Backend> Default for Operation<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B: Backend> Add for Operation<B> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Materialized(left), right) if left.is_empty() => right,
            (left, Self::Materialized(right)) if right.is_empty() => left,
            (Self::Materialized(mut left), Self::Materialized(right)) => {
                left.extend(right);
                Self::Materialized(left)
            }
            (Self::Constructors(mut left), Self::Constructors(right)) => {
                left.extend(right);
                Self::Constructors(left)
            }
            (left, right) => Self::Concat(Box::new(left), Box::new(right)),
        }
    }
}

impl<B: Backend> AddAssign for Operation<B> {
    fn add_assign(&mut self, rhs: Self) {
        let lhs = std::mem::take(self);
        *self = lhs + rhs;
    }
}

impl<B: Backend> From<ShaderUnit<B>> for Operation<B> {
    fn from(unit: ShaderUnit<B>) -> Self {
        Self::Materialized(vec![unit])
    }
}

impl<B: Backend> FromIterator<ShaderUnit<B>> for Operation<B> {
    fn from_iter<I: IntoIterator<Item = ShaderUnit<B>>>(iter: I) -> Self {
        Self::Materialized(iter.into_iter().collect())
    }
}

impl<B: Backend> fmt::Debug for Operation<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructors(constructors) => f.debug_tuple("Constructors").field(&constructors.len()).finish(),
            Self::Materialized(units) => f.debug_tuple("Materialized").field(units).finish(),
            Self::Concat(left, right) => f.debug_tuple("Concat").field(left).field(right).finish(),
        }
    }
}

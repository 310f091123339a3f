//! Ownership wiring between parents and children.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::model::Entity;
use crate::predicate::Predicate;
use crate::types::SequenceNumber;
use tracing::debug;

/// Attaches children to their owning parent within one context and saves
/// the whole batch at once.
///
/// A parent's owned collection is not stored; [`Self::children`] derives it
/// from the children's back-references, so it is consistent immediately
/// after an attach.
#[derive(Debug)]
pub struct RelationshipResolver<'a> {
    context: &'a Context,
    attached: usize,
}

impl<'a> RelationshipResolver<'a> {
    /// Starts a batch on `context`.
    #[must_use]
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            attached: 0,
        }
    }

    /// Points `child`'s back-reference at `parent` and stages the change.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when either entity belongs to another
    /// context or `C` has no relationship to `P`.
    pub fn attach_child<P: Entity, C: Entity>(&mut self, parent: &P, child: &mut C) -> CoreResult<()> {
        self.context.check_binding(parent)?;
        self.context.check_binding(child)?;
        let name = self.back_reference::<P, C>()?;

        child.set_relation(&name, Some(parent.id()));
        self.context.update(child)?;
        self.attached += 1;
        Ok(())
    }

    /// Children of `parent`, in creation order, as this context sees them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a foreign parent or a missing
    /// relationship, or any fetch error.
    pub fn children<P: Entity, C: Entity>(&self, parent: &P) -> CoreResult<Vec<C>> {
        self.context.check_binding(parent)?;
        let name = self.back_reference::<P, C>()?;
        self.context
            .fetch(Some(&Predicate::related_to(name, parent.id())), &[])
    }

    /// Number of children attached so far.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.attached
    }

    /// Saves the context once for the whole batch.
    ///
    /// # Errors
    ///
    /// Returns the save failure; the context has been rolled back.
    pub fn commit(self) -> CoreResult<SequenceNumber> {
        let sequence = self.context.try_save()?;
        debug!(context = %self.context.id(), attached = self.attached, %sequence, "relationship batch saved");
        Ok(sequence)
    }

    fn back_reference<P: Entity, C: Entity>(&self) -> CoreResult<String> {
        self.context
            .describe(C::ENTITY_NAME)
            .and_then(|d| d.relationships.iter().find(|r| r.destination == P::ENTITY_NAME))
            .map(|r| r.name.clone())
            .ok_or_else(|| {
                CoreError::invalid_request(format!(
                    "{} has no relationship to {}",
                    C::ENTITY_NAME,
                    P::ENTITY_NAME
                ))
            })
    }
}

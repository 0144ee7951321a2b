//! Service tree traversal.
//!
//! A walk visits the root first and, when `traverse` is set, every
//! descendant depth-first with each parent before its own children. Sibling
//! order is whatever the child lookup returns and carries no meaning.
//! The first error ends the walk; nodes already visited keep whatever the
//! visitor did to them.

use std::future::Future;

use corral_state::{Service, StateStore};

use crate::error::{FacadeError, FacadeResult};

/// Resolves services and their direct children.
pub trait ChildLookup {
    fn service(&self, id: &str) -> FacadeResult<Option<Service>>;
    fn children(&self, parent_id: &str) -> FacadeResult<Vec<Service>>;
}

impl ChildLookup for StateStore {
    fn service(&self, id: &str) -> FacadeResult<Option<Service>> {
        Ok(self.get_service(id)?)
    }

    fn children(&self, parent_id: &str) -> FacadeResult<Vec<Service>> {
        Ok(self.list_child_services(parent_id)?)
    }
}

/// Outcome of visiting one node.
#[derive(Debug)]
pub enum Visit {
    Continue,
    Stop(FacadeError),
}

/// Lazy pre-order iterator over a service tree.
///
/// Yields `Err` at most once, after which it is exhausted. A missing root
/// yields [`FacadeError::ServiceNotFound`].
pub struct ServiceWalk<'a, L: ChildLookup + ?Sized> {
    lookup: &'a L,
    root: Option<String>,
    traverse: bool,
    stack: Vec<Service>,
    done: bool,
}

impl<'a, L: ChildLookup + ?Sized> ServiceWalk<'a, L> {
    pub fn new(lookup: &'a L, root: &str, traverse: bool) -> Self {
        Self {
            lookup,
            root: Some(root.to_string()),
            traverse,
            stack: Vec::new(),
            done: false,
        }
    }

    fn fail(&mut self, err: FacadeError) -> Option<FacadeResult<Service>> {
        self.done = true;
        self.stack.clear();
        Some(Err(err))
    }
}

impl<L: ChildLookup + ?Sized> Iterator for ServiceWalk<'_, L> {
    type Item = FacadeResult<Service>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let svc = match self.root.take() {
            Some(root_id) => match self.lookup.service(&root_id) {
                Ok(Some(svc)) => svc,
                Ok(None) => return self.fail(FacadeError::ServiceNotFound(root_id)),
                Err(err) => return self.fail(err),
            },
            None => self.stack.pop()?,
        };

        if self.traverse {
            match self.lookup.children(&svc.id) {
                // Reversed so the first child returned is visited first.
                Ok(children) => self.stack.extend(children.into_iter().rev()),
                Err(err) => return self.fail(err),
            }
        }
        Some(Ok(svc))
    }
}

/// Walk the tree rooted at `root`, calling `visit` on each node.
///
/// Returns the number of nodes visited, or the error that stopped the walk.
pub async fn walk_services<L, F, Fut>(
    lookup: &L,
    root: &str,
    traverse: bool,
    mut visit: F,
) -> FacadeResult<usize>
where
    L: ChildLookup + ?Sized,
    F: FnMut(Service) -> Fut,
    Fut: Future<Output = Visit>,
{
    let mut visited = 0;
    for next in ServiceWalk::new(lookup, root, traverse) {
        match visit(next?).await {
            Visit::Continue => visited += 1,
            Visit::Stop(err) => return Err(err),
        }
    }
    Ok(visited)
}

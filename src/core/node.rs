//! # Parent linkage shared by groups and tasks.
//!
//! A [`Node`] carries a name and an optional back-pointer to the group that
//! owns it. The back-pointer is a `Weak`, so ownership always flows from
//! parent to child and a dropped parent simply reads as "detached".
//!
//! ## Rules
//! - A node has at most one parent; attaching elsewhere detaches it first.
//! - The parent key is fixed at attach time and cleared at detach time.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::group::{Group, GroupCore};

/// Back-pointer from a child to the group owning it.
#[derive(Clone)]
pub(crate) struct ParentLink {
    pub(crate) key: String,
    pub(crate) parent: Weak<GroupCore>,
}

impl ParentLink {
    pub(crate) fn new(key: impl Into<String>, parent: &Rc<GroupCore>) -> Self {
        Self {
            key: key.into(),
            parent: Rc::downgrade(parent),
        }
    }
}

/// Name plus parent link; embedded in every schedulable unit.
pub(crate) struct Node {
    name: String,
    link: RefCell<Option<ParentLink>>,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: RefCell::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Key under which the parent stores this node.
    pub(crate) fn key(&self) -> Option<String> {
        self.link.borrow().as_ref().map(|l| l.key.clone())
    }

    /// Parent group and key, if the parent is still alive.
    pub(crate) fn link(&self) -> Option<(Group, String)> {
        let link = self.link.borrow();
        let link = link.as_ref()?;
        let parent = link.parent.upgrade()?;
        Some((Group::from_core(parent), link.key.clone()))
    }

    pub(crate) fn parent(&self) -> Option<Group> {
        self.link().map(|(g, _)| g)
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.link().is_some()
    }

    pub(crate) fn set_link(&self, link: Option<ParentLink>) {
        *self.link.borrow_mut() = link;
    }

    /// True if the node sits in its parent's active set.
    pub(crate) fn is_running(&self) -> bool {
        match self.link() {
            Some((parent, key)) => parent.is_child_running(&key),
            None => false,
        }
    }
}

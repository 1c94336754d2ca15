//! In-process virtual medium used by the test suite (and the demo binary)
//! to exercise multiple nodes without real hardware.
//!
//! This module is not part of the protocol stack proper; it stands in for
//! the external physical-interface collaborator described in
//! `SPEC_FULL.md` §6.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::phy::{PhysicalInterface, PhysicalInterfaceOptions};

struct MediumInner {
    mailboxes: Vec<Rc<RefCell<VecDeque<u8>>>>,
    /// When set, every client's `send` silently loses its frame, as if the
    /// medium were jammed.
    broken: bool,
}

/// A shared, in-memory broadcast medium: every frame any client sends is
/// delivered to every other client's inbox.
#[derive(Clone)]
pub struct TransmissionMedium(Rc<RefCell<MediumInner>>);

impl TransmissionMedium {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(MediumInner {
            mailboxes: Vec::new(),
            broken: false,
        })))
    }

    pub fn set_broken(&self, broken: bool) {
        self.0.borrow_mut().broken = broken;
    }

    pub fn add_client(&self, options: PhysicalInterfaceOptions) -> VirtualPhysicalInterface {
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let id = {
            let mut inner = self.0.borrow_mut();
            inner.mailboxes.push(inbox.clone());
            inner.mailboxes.len() - 1
        };
        VirtualPhysicalInterface {
            id,
            inbox,
            medium: self.0.clone(),
            options,
        }
    }
}

impl Default for TransmissionMedium {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VirtualPhysicalInterface {
    id: usize,
    inbox: Rc<RefCell<VecDeque<u8>>>,
    medium: Rc<RefCell<MediumInner>>,
    options: PhysicalInterfaceOptions,
}

impl PhysicalInterface for VirtualPhysicalInterface {
    fn poll_incoming(&mut self) -> Vec<u8> {
        self.inbox.borrow_mut().drain(..).collect()
    }

    fn send(&mut self, frame: &[u8]) -> bool {
        let inner = self.medium.borrow();
        if inner.broken {
            return true;
        }
        for (i, mailbox) in inner.mailboxes.iter().enumerate() {
            if i == self.id {
                if !self.options.retransmit_back {
                    continue;
                }
            }
            mailbox.borrow_mut().extend(frame.iter().copied());
        }
        true
    }

    fn busy(&self) -> bool {
        false
    }

    fn options(&self) -> &PhysicalInterfaceOptions {
        &self.options
    }
}

use crate::attributes::AttributeValue;
use crate::monitor::Monitor;
use log::warn;
use std::collections::HashMap;

struct Frame {
    monitor: Monitor,
    /// Merged inheritable attributes visible to monitors started under this frame
    inheritable: HashMap<String, AttributeValue>,
}

/// Stack of open composite monitors for one path of execution
///
/// Every strategy variant stores one of these per path; they differ only in
/// where the stack lives.
#[derive(Default)]
pub struct PathStack {
    frames: Vec<Frame>,
}

impl PathStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `monitor`, handing it a snapshot of the inheritable attributes visible at the old top
    pub fn push(&mut self, monitor: &Monitor) {
        let mut inheritable = self.inheritable();
        monitor.set_inherited(inheritable.clone());
        inheritable.extend(monitor.own_inheritable());
        self.frames.push(Frame {
            monitor: monitor.clone(),
            inheritable,
        });
    }

    /// Pop `monitor` and attach it to its parent
    ///
    /// Monitors still open above it missed their end call. Each is attached to
    /// its stack predecessor before being removed. Returns false when `monitor`
    /// is not on this stack.
    pub fn complete(&mut self, monitor: &Monitor) -> bool {
        let Some(position) = self
            .frames
            .iter()
            .rposition(|frame| frame.monitor.ptr_eq(monitor))
        else {
            return false;
        };

        while self.frames.len() > position + 1 {
            if let Some(orphan) = self.frames.pop() {
                if let Some(predecessor) = self.frames.last() {
                    warn!(
                        "Monitor '{}' was not completed before '{}'; attaching it to '{}'",
                        orphan.monitor.name(),
                        monitor.name(),
                        predecessor.monitor.name()
                    );
                    predecessor.monitor.add_child(&orphan.monitor);
                }
            }
        }

        self.frames.pop();
        self.attach(monitor);
        true
    }

    /// Attach `monitor` as a child of the current top, if any
    pub fn attach(&self, monitor: &Monitor) {
        if let Some(top) = self.frames.last() {
            top.monitor.add_child(monitor);
        }
    }

    /// Record an inheritable attribute if `monitor` is the current top
    pub fn set_inheritable(&mut self, monitor: &Monitor, key: &str, holder: &AttributeValue) -> bool {
        match self.frames.last_mut() {
            Some(top) if top.monitor.ptr_eq(monitor) => {
                top.inheritable.insert(key.to_string(), holder.clone());
                true
            }
            _ => false,
        }
    }

    /// Nearest open monitor with the given name, searching from the top
    pub fn named(&self, name: &str) -> Option<Monitor> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.monitor.name() == name)
            .map(|frame| frame.monitor.clone())
    }

    pub fn inheritable(&self) -> HashMap<String, AttributeValue> {
        self.frames
            .last()
            .map(|frame| frame.inheritable.clone())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.frames.len();
        self.frames.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

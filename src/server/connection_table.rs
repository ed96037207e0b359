use std::collections::VecDeque;

use crate::server::connection::Connection;

/// One entry of the table.
pub enum Slot {
    Empty,
    /// Parked on the reactor, waiting for a readiness event.
    Idle(Box<Connection>),
    /// Checked out to a worker or to the reactor's current handler.
    Busy,
}

/// Fixed-size connection arena with a freelist
///
/// The table is sized once to the admission ceiling and never grows. Slot
/// indices double as epoll tokens, so an index stays bound to one connection
/// until that connection is released.
pub struct ConnectionTable {
    slots: Vec<Slot>,
    freelist: VecDeque<usize>,
    occupied: usize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        Self {
            slots,
            freelist: (0..capacity).collect(),
            occupied: 0,
        }
    }

    /// Reserve a free slot; it stays `Busy` until [`ConnectionTable::restore`]
    /// or [`ConnectionTable::release`].
    pub fn alloc(&mut self) -> Option<usize> {
        let id = self.freelist.pop_front()?;
        self.slots[id] = Slot::Busy;
        self.occupied += 1;
        Some(id)
    }

    /// Check a parked connection out of its slot.
    pub fn take(&mut self, id: usize) -> Option<Box<Connection>> {
        let slot = self.slots.get_mut(id)?;
        match std::mem::replace(slot, Slot::Busy) {
            Slot::Idle(conn) => Some(conn),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Park a connection back in the slot it was checked out of.
    pub fn restore(&mut self, id: usize, conn: Box<Connection>) {
        debug_assert!(
            matches!(self.slots[id], Slot::Busy),
            "restoring into a slot that was not checked out"
        );
        self.slots[id] = Slot::Idle(conn);
    }

    /// Return a checked-out slot to the freelist.
    pub fn release(&mut self, id: usize) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        if matches!(slot, Slot::Empty) {
            return;
        }
        *slot = Slot::Empty;
        self.freelist.push_back(id);
        self.occupied -= 1;
    }

    #[cfg(test)]
    fn is_busy(&self, id: usize) -> bool {
        matches!(self.slots.get(id), Some(Slot::Busy))
    }

    /// Take every parked connection out, leaving their slots `Busy`.
    pub fn drain_idle(&mut self) -> Vec<(usize, Box<Connection>)> {
        let mut out = Vec::new();
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Idle(_))
                && let Slot::Idle(conn) = std::mem::replace(slot, Slot::Busy)
            {
                out.push((id, conn));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

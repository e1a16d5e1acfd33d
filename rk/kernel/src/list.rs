//! Index-linked thread lists.
//!
//! Links live in the control blocks themselves, so a thread can sit in at
//! most one list at a time and insertion or removal never allocates.
//! Ready lists append at the tail; wait lists keep higher priorities in
//! front and arrival order within one priority.

use rk_core::ThreadId;

use crate::thread::ThreadArena;

/// Neighbours of a thread in the list it currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
}

impl Link {
    pub(crate) const UNLINKED: Link = Link { prev: None, next: None };
}

/// Doubly linked list of threads, threaded through the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ThreadList {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
}

impl ThreadList {
    pub(crate) const EMPTY: ThreadList = ThreadList { head: None, tail: None };

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn front(&self) -> Option<ThreadId> {
        self.head
    }

    pub(crate) fn push_back(&mut self, threads: &mut ThreadArena, id: ThreadId) {
        self.insert_before(threads, None, id);
    }

    /// Inserts behind every thread of equal or higher priority.
    pub(crate) fn insert_by_priority(&mut self, threads: &mut ThreadArena, id: ThreadId) {
        let priority = threads.tcb(id).priority();
        let mut cursor = self.head;
        while let Some(candidate) = cursor {
            let tcb = threads.tcb(candidate);
            if tcb.priority() < priority {
                break;
            }
            cursor = tcb.link.next;
        }
        self.insert_before(threads, cursor, id);
    }

    pub(crate) fn pop_front(&mut self, threads: &mut ThreadArena) -> Option<ThreadId> {
        let id = self.head?;
        self.remove(threads, id);
        Some(id)
    }

    /// Unlinks `id`, which must be a member of this list.
    pub(crate) fn remove(&mut self, threads: &mut ThreadArena, id: ThreadId) {
        let Link { prev, next } = threads.tcb(id).link;
        match prev {
            Some(prev) => threads.tcb_mut(prev).link.next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "{id} is not in this list");
                self.head = next;
            }
        }
        match next {
            Some(next) => threads.tcb_mut(next).link.prev = prev,
            None => self.tail = prev,
        }
        threads.tcb_mut(id).link = Link::UNLINKED;
    }

    pub(crate) fn iter<'a>(&self, threads: &'a ThreadArena) -> impl Iterator<Item = ThreadId> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            cursor = threads.tcb(id).link.next;
            Some(id)
        })
    }

    fn insert_before(&mut self, threads: &mut ThreadArena, before: Option<ThreadId>, id: ThreadId) {
        debug_assert_eq!(threads.tcb(id).link, Link::UNLINKED, "{id} is already linked");
        let prev = match before {
            Some(next) => threads.tcb(next).link.prev,
            None => self.tail,
        };
        threads.tcb_mut(id).link = Link { prev, next: before };
        match prev {
            Some(prev) => threads.tcb_mut(prev).link.next = Some(id),
            None => self.head = Some(id),
        }
        match before {
            Some(next) => threads.tcb_mut(next).link.prev = Some(id),
            None => self.tail = Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::thread::tests::tcb;
    use std::vec::Vec;

    fn arena(priorities: &[u8]) -> ThreadArena {
        let mut threads = ThreadArena::new();
        for (index, &priority) in priorities.iter().enumerate() {
            threads.insert(tcb(index as u8, priority)).unwrap();
        }
        threads
    }

    fn ids(list: &ThreadList, threads: &ThreadArena) -> Vec<usize> {
        list.iter(threads).map(ThreadId::index).collect()
    }

    #[test]
    fn test_push_back_keeps_arrival_order() {
        let mut threads = arena(&[1, 1, 1]);
        let mut list = ThreadList::EMPTY;
        for index in [2, 0, 1] {
            list.push_back(&mut threads, ThreadId::new(index));
        }
        assert_eq!(ids(&list, &threads), [2, 0, 1]);
        assert_eq!(list.pop_front(&mut threads), Some(ThreadId::new(2)));
        assert_eq!(ids(&list, &threads), [0, 1]);
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut threads = arena(&[2, 5, 2, 9, 5]);
        let mut list = ThreadList::EMPTY;
        for index in 0..5 {
            list.insert_by_priority(&mut threads, ThreadId::new(index));
        }
        assert_eq!(ids(&list, &threads), [3, 1, 4, 0, 2]);
    }

    #[test]
    fn test_remove_from_middle_and_ends() {
        let mut threads = arena(&[1, 1, 1, 1]);
        let mut list = ThreadList::EMPTY;
        for index in 0..4 {
            list.push_back(&mut threads, ThreadId::new(index));
        }
        list.remove(&mut threads, ThreadId::new(1));
        assert_eq!(ids(&list, &threads), [0, 2, 3]);
        list.remove(&mut threads, ThreadId::new(3));
        list.remove(&mut threads, ThreadId::new(0));
        assert_eq!(ids(&list, &threads), [2]);
        list.remove(&mut threads, ThreadId::new(2));
        assert!(list.is_empty());
        assert_eq!(threads.tcb(ThreadId::new(2)).link, Link::UNLINKED);

        list.push_back(&mut threads, ThreadId::new(1));
        assert_eq!(list.front(), Some(ThreadId::new(1)));
    }
}

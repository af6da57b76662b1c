use std::marker::PhantomData;

use crate::block::FreeBlock;

/// Doubly linked list to keep track of free blocks.
///
/// The list doesn't own any memory. Its nodes are the free blocks themselves:
/// since the payload of a free block won't be used by the user, we store the
/// links to the next and previous free blocks right there. See [`FreeBlock`].
///
/// ```text
///                      Free List
///
///   head
///    |        +---------------------+    +---------------------+
///    +------> | hdr | next | prev | | -> | hdr | next | prev | | -> None
///             +---------------------+    +---------------------+
///                 Block(free)                Block(free)
/// ```
///
/// Blocks are always inserted at the head, so the list is in LIFO order and not
/// in address order. Insertion and removal are both O(1).
pub(crate) struct FreeList {
    head: Option<FreeBlock>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Option<FreeBlock>,
    remaining: usize,
    marker: PhantomData<&'a FreeList>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn head(&self) -> Option<FreeBlock> {
        self.head
    }

    /// Pushes `block` as the new head of the list.
    pub fn insert(&mut self, block: FreeBlock) {
        block.set_prev_free(None);
        block.set_next_free(self.head);

        if let Some(old_head) = self.head {
            old_head.set_prev_free(Some(block));
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` from the list. The block must be a member, the list is
    /// never searched.
    pub fn remove(&mut self, block: FreeBlock) {
        match (block.prev_free(), block.next_free()) {
            // Only item
            (None, None) => {
                debug_assert_eq!(self.head, Some(block));
                self.head = None;
            }
            // First item
            (None, Some(next)) => {
                next.set_prev_free(None);
                self.head = Some(next);
            }
            // Last item
            (Some(prev), None) => prev.set_next_free(None),
            // Middle item
            (Some(prev), Some(next)) => {
                prev.set_next_free(Some(next));
                next.set_prev_free(Some(prev));
            }
        }

        self.len -= 1;
    }

    /// Returns the first block on the list with room for `size` bytes, block
    /// overhead included.
    ///
    /// This is a first-fit search over a LIFO list, so the most recently freed
    /// blocks are tried first.
    pub fn find_fit(&self, size: usize) -> Option<FreeBlock> {
        self.iter().find(|free| free.block().size() >= size)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let block = self.current?;
        self.current = block.next_free();
        self.remaining -= 1;

        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a FreeList {
    type Item = FreeBlock;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

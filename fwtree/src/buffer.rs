//! Backing buffers for tree nodes.
//!
//! Parser output aliases the input image where possible: every node's bytes
//! are a view into one shared arena, so parsing a large image performs no
//! per-node copies. Assembler output is freshly allocated per node. Both
//! shapes hide behind [`Buffer`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use crate::err::FirmwareError;
use core::fmt;
use std::sync::Arc;

/// The bytes backing a tree node: either a view into a parent arena or an
/// independently owned vector.
#[derive(Clone)]
pub enum Buffer {
    /// A sub-range of a shared arena.
    View { arena: Arc<[u8]>, start: usize, end: usize },
    /// Freshly allocated bytes.
    Owned(Vec<u8>),
}

impl Buffer {
    /// Wrap a full image as the root arena view.
    pub fn root(data: Vec<u8>) -> Self {
        let end = data.len();
        Buffer::View { arena: Arc::from(data), start: 0, end }
    }

    /// Take ownership of freshly built bytes.
    pub fn owned(data: Vec<u8>) -> Self {
        Buffer::Owned(data)
    }

    /// A view of a sub-range of this buffer.
    ///
    /// Views of views share the original arena; a sub-range of an owned
    /// buffer is copied out.
    pub fn view(&self, start: usize, end: usize) -> Result<Buffer, FirmwareError> {
        if start > end || end > self.len() {
            return Err(FirmwareError::ShortBuffer { what: "buffer view", need: end, have: self.len() });
        }
        match self {
            Buffer::View { arena, start: base, .. } => {
                Ok(Buffer::View { arena: arena.clone(), start: base + start, end: base + end })
            }
            Buffer::Owned(data) => Ok(Buffer::Owned(data[start..end].to_vec())),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::View { arena, start, end } => &arena[*start..*end],
            Buffer::Owned(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::View { start, end, .. } => end - start,
            Buffer::Owned(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Buffer::View { arena, start, end } => arena[start..end].to_vec(),
            Buffer::Owned(data) => data,
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::Owned(Vec::new())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::Owned(data)
    }
}

impl fmt::Debug for Buffer {
    // contents elided: image bytes drown out everything else in debug output
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buffer::View { start, end, .. } => {
                f.debug_struct("Buffer::View").field("start", start).field("end", end).finish()
            }
            Buffer::Owned(data) => f.debug_struct("Buffer::Owned").field("len", &data.len()).finish(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn views_share_the_arena() {
        let root = Buffer::root(vec![0, 1, 2, 3, 4, 5, 6, 7]);
        let mid = root.view(2, 6).unwrap();
        assert_eq!(mid.as_slice(), &[2, 3, 4, 5]);
        let inner = mid.view(1, 3).unwrap();
        assert_eq!(inner.as_slice(), &[3, 4]);
        match inner {
            Buffer::View { start, end, .. } => assert_eq!((start, end), (3, 5)),
            Buffer::Owned(_) => panic!("expected a view"),
        }
    }

    #[test]
    fn view_bounds_are_checked() {
        let root = Buffer::root(vec![0; 4]);
        assert!(root.view(2, 8).is_err());
        assert!(root.view(3, 2).is_err());
    }

    #[test]
    fn owned_subview_copies() {
        let owned = Buffer::owned(vec![9, 8, 7]);
        let sub = owned.view(1, 3).unwrap();
        assert_eq!(sub.as_slice(), &[8, 7]);
        assert_eq!(sub.into_vec(), vec![8, 7]);
    }
}

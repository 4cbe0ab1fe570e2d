//! # Backing stores
//!
//! A store supplies the content of the areas it backs. Every store implements
//! the full [`BackingStore`] operation set; operations a store cannot perform
//! are answered with an error rather than left out.
//!
//! Areas hold a store through `Arc<Store>`. Whoever drops the last reference
//! hands it to [`Store::destroy_if_unreferenced`], which runs the store's own
//! teardown exactly once.

mod null;

use crate::aspace::AddressSpace;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

pub use null::NullStore;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("operation not supported by this store")]
    NotSupported,
    #[error("page fault cannot be resolved")]
    PageFaultFatal,
}

/// One contiguous buffer of a scatter/gather transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IoVec {
    pub base: VirtualAddress,
    pub len: usize,
}

pub trait BackingStore: Send + Sync {
    /// Release the store's own resources. Called once, after the last area
    /// referencing the store is gone.
    fn destroy(self: Box<Self>);

    /// Guarantee backing for `size` bytes; returns the committed size.
    fn commit(&self, size: u64) -> u64;

    fn committed_size(&self) -> u64;

    /// Whether the page at `offset` can be provided without I/O.
    fn has_page(&self, offset: u64) -> bool;

    /// # Errors
    /// Store-specific; [`StoreError::NotSupported`] if the store carries no
    /// content.
    fn read(&self, offset: u64, vecs: &mut [IoVec]) -> Result<usize, StoreError>;

    /// # Errors
    /// Store-specific; [`StoreError::NotSupported`] if the store carries no
    /// content.
    fn write(&self, offset: u64, vecs: &[IoVec]) -> Result<usize, StoreError>;

    /// Resolve a fault at `offset` inside `space`.
    ///
    /// # Errors
    /// [`StoreError::PageFaultFatal`] if the fault cannot be resolved.
    fn fault(&self, space: &AddressSpace, offset: u64) -> Result<(), StoreError>;
}

/// Shared handle around a store implementation.
pub struct Store {
    kind: &'static str,
    inner: Box<dyn BackingStore>,
}

impl Store {
    #[must_use]
    pub fn new(kind: &'static str, inner: Box<dyn BackingStore>) -> Arc<Self> {
        Arc::new(Self { kind, inner })
    }

    /// A store that is never a content channel.
    #[must_use]
    pub fn null() -> Arc<Self> {
        Self::new("null", Box::new(NullStore::new()))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn commit(&self, size: u64) -> u64 {
        self.inner.commit(size)
    }

    #[must_use]
    pub fn committed_size(&self) -> u64 {
        self.inner.committed_size()
    }

    #[must_use]
    pub fn has_page(&self, offset: u64) -> bool {
        self.inner.has_page(offset)
    }

    /// # Errors
    /// See [`BackingStore::read`].
    pub fn read(&self, offset: u64, vecs: &mut [IoVec]) -> Result<usize, StoreError> {
        self.inner.read(offset, vecs)
    }

    /// # Errors
    /// See [`BackingStore::write`].
    pub fn write(&self, offset: u64, vecs: &[IoVec]) -> Result<usize, StoreError> {
        self.inner.write(offset, vecs)
    }

    /// # Errors
    /// See [`BackingStore::fault`].
    pub fn fault(&self, space: &AddressSpace, offset: u64) -> Result<(), StoreError> {
        self.inner.fault(space, offset)
    }

    /// Drop one reference; destroy the store if it was the last.
    ///
    /// Returns `true` if the store was destroyed.
    pub fn destroy_if_unreferenced(this: Arc<Self>) -> bool {
        match Arc::into_inner(this) {
            Some(store) => {
                log::debug!("destroying {} store", store.kind);
                store.inner.destroy();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.kind)
            .field("committed_size", &self.committed_size())
            .finish_non_exhaustive()
    }
}

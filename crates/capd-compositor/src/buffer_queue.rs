//! Producer/consumer buffer-pair construction (spec &4.3).

use std::ffi::c_void;

use capd_resolver::ResolverCatalog;

use crate::error::{Error, Result};

/// Opaque reference to one side of a buffer queue. The producer handle is
/// handed to [`crate::gateway::DisplayGateway::configure_projection`]; the
/// consumer handle is handed to [`crate::texture_consumer::TextureConsumer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferHandle(pub(crate) *mut c_void);

impl BufferHandle {
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    #[must_use]
    pub fn raw(&self) -> *mut c_void {
        self.0
    }
}

pub struct BufferQueue;

impl BufferQueue {
    /// Creates a producer/consumer pair via the resolved `create_buffer_queue`
    /// entry point. The resolver already picked the allocator-argument or
    /// no-allocator-argument variant based on platform version.
    pub fn create(catalog: &ResolverCatalog) -> Result<(BufferHandle, BufferHandle)> {
        let (producer, consumer) = catalog
            .create_buffer_queue()
            .map_err(Error::PrivateApiUnavailable)?;
        Ok((BufferHandle(producer), BufferHandle(consumer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_reports_null() {
        let h = BufferHandle(std::ptr::null_mut());
        assert!(h.is_null());
    }
}

//! Command implementations for ecuflash

pub mod flash;
pub mod inspect;

pub use flash::flash;
pub use inspect::inspect;

use std::path::Path;

use ecuflash_core::FlashError;

/// Read a raw binary image
pub fn read_image(path: &Path) -> Result<Vec<u8>, FlashError> {
    std::fs::read(path).map_err(|source| FlashError::ImageRead {
        path: path.to_path_buf(),
        source,
    })
}

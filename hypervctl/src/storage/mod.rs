//! Virtual hard disk images and their attachment.

mod disk;
mod image;

pub use disk::{first_free_address, DiskAttachment, DiskRole};
pub use image::{VhdFormat, VhdType};

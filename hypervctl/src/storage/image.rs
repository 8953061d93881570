//! Creating, resizing and deleting virtual hard disk images.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::query;
use crate::resource::ResourceSettingsOrchestrator;
use crate::transport::{Instance, MethodInputs, Transport};

const SECTOR_SIZE: u32 = 512;

/// On-disk image format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhdFormat {
    Vhd,
    Vhdx,
}

impl VhdFormat {
    pub fn from_path(path: &str) -> Result<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("vhd") => Ok(VhdFormat::Vhd),
            Some("vhdx") => Ok(VhdFormat::Vhdx),
            _ => Err(Error::validation(
                "path",
                format!("'{}' must end in .vhd or .vhdx", path),
            )),
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            VhdFormat::Vhd => 2,
            VhdFormat::Vhdx => 3,
        }
    }
}

impl fmt::Display for VhdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VhdFormat::Vhd => write!(f, "VHD"),
            VhdFormat::Vhdx => write!(f, "VHDX"),
        }
    }
}

/// Allocation strategy of a new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VhdType {
    /// Full size allocated up front.
    Fixed,
    /// Grows on demand.
    #[default]
    Dynamic,
}

impl VhdType {
    pub fn value(&self) -> u16 {
        match self {
            VhdType::Fixed => 2,
            VhdType::Dynamic => 3,
        }
    }
}

fn require_size(size_bytes: u64) -> Result<()> {
    if size_bytes == 0 {
        return Err(Error::validation("size_bytes", "size must be greater than zero"));
    }
    Ok(())
}

fn io_error(path: &str) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_string(),
        source,
    }
}

impl<T: Transport + ?Sized> ResourceSettingsOrchestrator<'_, T> {
    /// Create a new image at `path`. The file must not exist yet.
    pub fn create_vhd(&self, path: &str, size_bytes: u64, vhd_type: VhdType) -> Result<()> {
        let format = VhdFormat::from_path(path)?;
        require_size(size_bytes)?;
        if Path::new(path).exists() {
            return Err(Error::validation("path", format!("'{}' already exists", path)));
        }

        let disk = Instance::new(query::VIRTUAL_HARD_DISK_SETTING_DATA)
            .with("Path", path)
            .with("Format", format.value())
            .with("Type", vhd_type.value())
            .with("MaxInternalSize", size_bytes)
            .with("BlockSize", 0u32)
            .with("LogicalSectorSize", SECTOR_SIZE)
            .with("PhysicalSectorSize", SECTOR_SIZE);
        let inputs = MethodInputs::new().with("VirtualDiskSettingData", disk);

        self.call_on(
            query::IMAGE_MANAGEMENT_SERVICE,
            "CreateVirtualHardDisk",
            &inputs,
            "Failed to create virtual hard disk",
        )?;
        info!(path, size_bytes, format = %format, ?vhd_type, "Created virtual hard disk");
        Ok(())
    }

    /// Grow an image to `size_bytes`, which must exceed the file's current size.
    pub fn resize_vhd(&self, path: &str, size_bytes: u64) -> Result<()> {
        require_size(size_bytes)?;
        let used = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("Virtual hard disk", path));
            }
            Err(e) => return Err(io_error(path)(e)),
        };
        if size_bytes <= used {
            return Err(Error::validation(
                "size_bytes",
                format!("new size {} must exceed the {} bytes in use", size_bytes, used),
            ));
        }

        let inputs = MethodInputs::new()
            .with("Path", path)
            .with("MaxInternalSize", size_bytes);
        self.call_on(
            query::IMAGE_MANAGEMENT_SERVICE,
            "ResizeVirtualHardDisk",
            &inputs,
            "Failed to resize virtual hard disk",
        )?;
        info!(path, size_bytes, "Resized virtual hard disk");
        Ok(())
    }

    /// Delete an image file. Detach it from every VM first.
    pub fn delete_vhd(&self, path: &str) -> Result<()> {
        VhdFormat::from_path(path)?;
        if !Path::new(path).exists() {
            return Err(Error::not_found("Virtual hard disk", path));
        }
        fs::remove_file(path).map_err(io_error(path))?;
        info!(path, "Deleted virtual hard disk");
        Ok(())
    }
}

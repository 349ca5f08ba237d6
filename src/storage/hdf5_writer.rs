//! HDF5 frame store.
//!
//! Each call opens the file, writes, and closes it again, so a reader opening the file
//! between frames never sees a half-written dataset. The file is created on the first
//! run and later runs are added next to earlier ones.
//!
//! Requires the `storage_hdf5` feature; without it every operation returns
//! [`DaqError::FeatureNotEnabled`].

use std::path::{Path, PathBuf};

use super::{FrameStore, RunDescriptor};
use crate::error::{AppResult, DaqError};
use crate::session::ProcessedResult;

/// Appends processed frames to an HDF5 file.
#[derive(Debug)]
pub struct Hdf5FrameStore {
    path: PathBuf,
    #[cfg_attr(not(feature = "storage_hdf5"), allow(dead_code))]
    compression_level: u8,
    run: Option<RunDescriptor>,
}

impl Hdf5FrameStore {
    /// Store writing to `path` with deflate `compression_level` (0 disables compression).
    pub fn new(path: impl AsRef<Path>, compression_level: u8) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            compression_level: compression_level.min(9),
            run: None,
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current_run(&self) -> AppResult<&RunDescriptor> {
        self.run
            .as_ref()
            .ok_or_else(|| DaqError::Persistence("no run started".into()))
    }
}

#[cfg(feature = "storage_hdf5")]
mod backend {
    use hdf5::types::VarLenUnicode;
    use hdf5::{File, Group, Location};

    use super::*;
    use crate::storage::{dataset_name, scan_group_name};

    fn open_or_create(path: &Path) -> AppResult<File> {
        if path.exists() {
            Ok(File::open_rw(path)?)
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(File::create(path)?)
        }
    }

    fn group_or_create(parent: &Group, name: &str) -> AppResult<(Group, bool)> {
        match parent.group(name) {
            Ok(group) => Ok((group, false)),
            Err(_) => Ok((parent.create_group(name)?, true)),
        }
    }

    fn write_str_attr(location: &Location, name: &str, value: &str) -> AppResult<()> {
        let value: VarLenUnicode = value
            .parse()
            .map_err(|e| DaqError::Persistence(format!("attribute '{}': {}", name, e)))?;
        location
            .new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&value)?;
        Ok(())
    }

    fn write_f64_attr(location: &Location, name: &str, value: f64) -> AppResult<()> {
        location.new_attr::<f64>().create(name)?.write_scalar(&value)?;
        Ok(())
    }

    pub(super) fn begin_run(path: &Path, run: &RunDescriptor) -> AppResult<()> {
        let file = open_or_create(path)?;
        let (group, created) = group_or_create(&file, &run.name)?;
        if !created {
            return Ok(());
        }

        group
            .new_attr::<u64>()
            .create("frame_count")?
            .write_scalar(&u64::from(run.frame_count))?;
        for (name, value) in [
            ("roi_xmin", run.roi.xmin),
            ("roi_xmax", run.roi.xmax),
            ("roi_ymin", run.roi.ymin),
            ("roi_ymax", run.roi.ymax),
        ] {
            group.new_attr::<u64>().create(name)?.write_scalar(&(value as u64))?;
        }
        if let Some(scan) = &run.scan {
            write_str_attr(&group, "scan_device", &scan.device)?;
            write_str_attr(&group, "scan_parameter", &scan.parameter)?;
            write_str_attr(&group, "scan_unit", &scan.unit)?;
        }
        Ok(())
    }

    pub(super) fn append(
        path: &Path,
        run: &RunDescriptor,
        compression_level: u8,
        result: &ProcessedResult,
    ) -> AppResult<()> {
        let file = open_or_create(path)?;
        let (run_group, _) = group_or_create(&file, &run.name)?;

        let parent = match (&run.scan, result.scan_point()) {
            (Some(scan), Some(point)) => {
                let name = scan_group_name(&scan.parameter, &point.label);
                let (group, created) = group_or_create(&run_group, &name)?;
                if created {
                    write_str_attr(&group, "parameter", &scan.parameter)?;
                    write_f64_attr(&group, "value", point.value)?;
                    write_str_attr(&group, "unit", &scan.unit)?;
                }
                group
            }
            _ => run_group,
        };

        let crop = &result.roi_crop;
        let (nx, ny) = crop.dim();
        let values: Vec<f64> = crop.iter().copied().collect();

        let builder = parent.new_dataset::<f64>().chunk((nx, ny));
        let builder = if compression_level > 0 {
            builder.deflate(compression_level)
        } else {
            builder
        };
        let dataset = builder
            .shape((nx, ny))
            .create(dataset_name(result.sequence_index).as_str())?;
        dataset.write_raw(values.as_slice())?;

        write_f64_attr(&dataset, "scalar_count", result.scalar_count)?;
        if let Some(fit) = &result.fit {
            for (name, value) in fit.params.named_values() {
                write_f64_attr(&dataset, name, value)?;
            }
            dataset
                .new_attr::<u8>()
                .create("fit_converged")?
                .write_scalar(&u8::from(fit.converged))?;
        }
        Ok(())
    }
}

impl FrameStore for Hdf5FrameStore {
    fn begin_run(&mut self, run: &RunDescriptor) -> AppResult<()> {
        #[cfg(feature = "storage_hdf5")]
        {
            backend::begin_run(&self.path, run)?;
            self.run = Some(run.clone());
            Ok(())
        }

        #[cfg(not(feature = "storage_hdf5"))]
        {
            self.run = Some(run.clone());
            Err(DaqError::FeatureNotEnabled("storage_hdf5".into()))
        }
    }

    fn append(&mut self, result: &ProcessedResult) -> AppResult<()> {
        let run = self.current_run()?;

        #[cfg(feature = "storage_hdf5")]
        {
            backend::append(&self.path, run, self.compression_level, result)
        }

        #[cfg(not(feature = "storage_hdf5"))]
        {
            let _ = (run, result);
            Err(DaqError::FeatureNotEnabled("storage_hdf5".into()))
        }
    }
}

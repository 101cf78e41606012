//! Build-time mainboard/cellboard identity info.
//!
//! Grounded in the original's `identity.h`: a build timestamp plus the
//! latest version payload reported by each cellboard. Build time is not a
//! domain computation, just ambient metadata captured at compile time, so
//! the shape here follows the original header directly.

use heapless::Vec;

use crate::conf::CELLBOARD_COUNT;

/// Supplied by the build script via `env!` at the composition root; kept as
/// a plain field here so this module stays free of build-script coupling.
#[derive(Clone, Copy, defmt::Format)]
pub struct MainboardVersion {
    pub build_unix_time: u32,
    pub component_version: u8,
    pub canlib_version: u8,
}

#[derive(Clone, Copy, Default, defmt::Format)]
pub struct CellboardVersion {
    pub component_version: u8,
    pub canlib_version: u8,
}

pub struct Identity {
    mainboard: MainboardVersion,
    cellboards: [Option<CellboardVersion>; CELLBOARD_COUNT],
}

impl Identity {
    pub const fn new(mainboard: MainboardVersion) -> Self {
        Self {
            mainboard,
            cellboards: [None; CELLBOARD_COUNT],
        }
    }

    pub fn mainboard_version(&self) -> MainboardVersion {
        self.mainboard
    }

    /// Handler for the incoming per-cellboard version report.
    pub fn handle_cellboard_version(&mut self, cellboard: u8, version: CellboardVersion) {
        if let Some(slot) = self.cellboards.get_mut(cellboard as usize) {
            *slot = Some(version);
        }
    }

    pub fn cellboard_version(&self, cellboard: u8) -> Option<CellboardVersion> {
        self.cellboards.get(cellboard as usize).copied().flatten()
    }

    /// Cellboards that have not yet reported a version since boot.
    pub fn missing_cellboards(&self) -> Vec<u8, CELLBOARD_COUNT> {
        let mut out = Vec::new();
        for (i, v) in self.cellboards.iter().enumerate() {
            if v.is_none() {
                let _ = out.push(i as u8);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreported_cellboards_start_missing() {
        let identity = Identity::new(MainboardVersion {
            build_unix_time: 0,
            component_version: 1,
            canlib_version: 1,
        });
        assert_eq!(identity.missing_cellboards().len(), CELLBOARD_COUNT);
    }

    #[test]
    fn reporting_a_cellboard_clears_it_from_missing() {
        let mut identity = Identity::new(MainboardVersion {
            build_unix_time: 0,
            component_version: 1,
            canlib_version: 1,
        });
        identity.handle_cellboard_version(2, CellboardVersion { component_version: 3, canlib_version: 1 });
        assert!(!identity.missing_cellboards().contains(&2));
        assert_eq!(identity.cellboard_version(2).unwrap().component_version, 3);
    }
}

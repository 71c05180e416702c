// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Functional tensix core locations (NOC 0 coordinates) after harvesting.

use std::collections::BTreeSet;

pub type CoreCoord = (u8, u8);

const WH_TENSIX_COLS: [u8; 8] = [1, 2, 3, 4, 6, 7, 8, 9];
const WH_TENSIX_ROWS: [u8; 10] = [1, 2, 3, 4, 5, 7, 8, 9, 10, 11];
const WH_PHYS_Y_TO_NOC_0_Y: [u8; 12] = [0, 11, 1, 10, 2, 9, 3, 8, 4, 7, 5, 6];

const BH_TENSIX_COLS: [u8; 14] = [1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16];

/// Wormhole harvests whole rows. `harvest_bits` is the mask returned by the
/// ARC "get harvesting" message; bit `n` disables physical row `n + 1`.
pub fn wormhole_tensix_cores(harvest_bits: u32) -> BTreeSet<CoreCoord> {
    let bad_row_bits = (harvest_bits as u64) << 1;
    let disabled_rows: BTreeSet<u8> = WH_PHYS_Y_TO_NOC_0_Y
        .iter()
        .enumerate()
        .filter(|(phys, _)| bad_row_bits & (1 << phys) != 0)
        .map(|(_, noc_y)| *noc_y)
        .collect();

    WH_TENSIX_COLS
        .iter()
        .flat_map(|x| {
            WH_TENSIX_ROWS
                .iter()
                .filter(|y| !disabled_rows.contains(y))
                .map(move |y| (*x, *y))
        })
        .collect()
}

/// Blackhole harvests whole columns, reported through telemetry as a bitmask
/// over [`BH_TENSIX_COLS`].
///
/// With NOC translation on, the harvested columns are moved to the right-hand
/// side of the grid so the first `popcount(enabled_cols)` columns stay usable.
pub fn blackhole_tensix_cores(enabled_cols: u32, noc_translation: bool) -> BTreeSet<CoreCoord> {
    let columns: BTreeSet<u8> = if noc_translation {
        let count = enabled_cols.count_ones() as u8;
        BH_TENSIX_COLS
            .iter()
            .copied()
            .filter(|x| {
                let logical = if *x >= 10 { *x - 2 } else { *x };
                logical <= count
            })
            .collect()
    } else {
        BH_TENSIX_COLS
            .iter()
            .enumerate()
            .filter(|(bit, _)| enabled_cols & (1 << bit) != 0)
            .map(|(_, x)| *x)
            .collect()
    };

    columns
        .iter()
        .flat_map(|x| (2..12).map(move |y| (*x, y)))
        .collect()
}

//! Transport Block Size Calculation
//!
//! Implements TBS determination according to 3GPP TS 38.214 clause 5.1.3.2
//! with the 64QAM MCS table (TS 38.214 Table 5.1.3.1-1).

/// Subcarriers per resource block
const NOF_SUBCARRIERS_PER_RB: u32 = 12;

/// Maximum number of PRBs of a carrier
pub const MAX_NOF_PRBS: u16 = 275;

/// (modulation order, target code rate x 1024)
const MCS_TABLE_64QAM: [(u8, u16); 29] = [
    (2, 120), (2, 157), (2, 193), (2, 251), (2, 308), (2, 379), (2, 449), (2, 526),
    (2, 602), (2, 679), (4, 340), (4, 378), (4, 434), (4, 490), (4, 553), (4, 616),
    (4, 658), (6, 438), (6, 466), (6, 517), (6, 567), (6, 616), (6, 666), (6, 719),
    (6, 772), (6, 822), (6, 873), (6, 910), (6, 948),
];

/// TS 38.214 Table 5.1.3.2-1
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064,
    1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800,
    1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856,
    2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Highest valid MCS index
pub const MAX_MCS: u8 = 28;

/// Inputs of one TBS computation
#[derive(Debug, Clone, Copy)]
pub struct TbsParams {
    pub mcs: u8,
    pub nof_prbs: u16,
    pub nof_symbols: u8,
    pub nof_dmrs_symbols: u8,
}

/// Result of a PRB search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrbsTbs {
    pub nof_prbs: u16,
    pub tbs_bytes: u32,
}

/// DMRS symbols of a mapping type A allocation ending at `last_symbol`
/// (TS 38.211 Table 7.4.1.1.2-3, dmrs-AdditionalPosition pos2)
pub fn nof_dmrs_symbols(last_symbol: u8) -> u8 {
    if last_symbol < 8 {
        1
    } else if last_symbol < 10 {
        2
    } else {
        3
    }
}

/// Modulation order and code rate for an MCS index
pub fn mcs_info(mcs: u8) -> Option<(u8, f64)> {
    MCS_TABLE_64QAM
        .get(mcs as usize)
        .map(|(qm, r)| (*qm, *r as f64 / 1024.0))
}

/// Transport block size in bits
pub fn tbs_bits(params: TbsParams) -> u32 {
    let (qm, rate) = match mcs_info(params.mcs) {
        Some(info) => info,
        None => return 0,
    };
    if params.nof_prbs == 0 || params.nof_symbols <= params.nof_dmrs_symbols {
        return 0;
    }

    // DMRS with two CDM groups without data occupies the whole symbol
    let re_per_prb = NOF_SUBCARRIERS_PER_RB * params.nof_symbols as u32
        - NOF_SUBCARRIERS_PER_RB * params.nof_dmrs_symbols as u32;
    let nof_re = re_per_prb.min(156) * params.nof_prbs as u32;
    let n_info = nof_re as f64 * rate * qm as f64;

    if n_info <= 3824.0 {
        let n = (n_info.log2().floor() as i32 - 6).max(3);
        let step = 2f64.powi(n);
        let n_info_q = (step * (n_info / step).floor()).max(24.0) as u32;
        TBS_TABLE
            .iter()
            .copied()
            .find(|tbs| *tbs >= n_info_q)
            .unwrap_or(3824)
    } else {
        let n = ((n_info - 24.0).log2().floor() as i32) - 5;
        let step = 2f64.powi(n);
        let n_info_q = (step * ((n_info - 24.0) / step).round()).max(3840.0);
        let with_crc = n_info_q + 24.0;
        if rate <= 0.25 {
            let c = (with_crc / 3816.0).ceil();
            (8.0 * c * (with_crc / (8.0 * c)).ceil() - 24.0) as u32
        } else if n_info_q > 8424.0 {
            let c = (with_crc / 8424.0).ceil();
            (8.0 * c * (with_crc / (8.0 * c)).ceil() - 24.0) as u32
        } else {
            (8.0 * (with_crc / 8.0).ceil() - 24.0) as u32
        }
    }
}

/// Transport block size in bytes
pub fn tbs_bytes(params: TbsParams) -> u32 {
    tbs_bits(params) / 8
}

/// Smallest PRB count whose TBS carries `payload_bytes`
pub fn prbs_for_payload(
    payload_bytes: u32,
    mcs: u8,
    nof_symbols: u8,
    nof_dmrs_symbols: u8,
    max_prbs: u16,
) -> Option<PrbsTbs> {
    let max_prbs = max_prbs.min(MAX_NOF_PRBS);
    let tbs_at = |nof_prbs: u16| {
        tbs_bytes(TbsParams { mcs, nof_prbs, nof_symbols, nof_dmrs_symbols })
    };
    if max_prbs == 0 || tbs_at(max_prbs) < payload_bytes {
        return None;
    }
    let (mut lo, mut hi) = (1u16, max_prbs);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if tbs_at(mid) >= payload_bytes {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(PrbsTbs { nof_prbs: lo, tbs_bytes: tbs_at(lo) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tbs_small_allocations() {
        let params = TbsParams { mcs: 0, nof_prbs: 1, nof_symbols: 12, nof_dmrs_symbols: 1 };
        assert_eq!(tbs_bits(params), 24);
        assert_eq!(tbs_bits(TbsParams { nof_prbs: 10, ..params }), 304);
    }

    #[test]
    fn test_tbs_large_allocation() {
        // 100 PRBs, MCS 27: N_info = 132 * 100 * 6 * 910/1024 > 3824
        let params = TbsParams { mcs: 27, nof_prbs: 100, nof_symbols: 12, nof_dmrs_symbols: 1 };
        let tbs = tbs_bits(params);
        assert!(tbs > 60_000 && tbs < 75_000, "tbs={}", tbs);
        assert_eq!((tbs + 24) % 8, 0);
    }

    #[test]
    fn test_tbs_monotonic_in_prbs() {
        let mut last = 0;
        for nof_prbs in 1..=MAX_NOF_PRBS {
            let tbs = tbs_bits(TbsParams { mcs: 9, nof_prbs, nof_symbols: 12, nof_dmrs_symbols: 3 });
            assert!(tbs >= last);
            last = tbs;
        }
    }

    #[test]
    fn test_prbs_for_payload() {
        let res = prbs_for_payload(38, 0, 12, 1, 52).unwrap();
        assert_eq!(res, PrbsTbs { nof_prbs: 10, tbs_bytes: 38 });
        assert!(prbs_for_payload(10_000, 0, 12, 1, 10).is_none());
    }

    #[test]
    fn test_invalid_mcs() {
        assert!(mcs_info(29).is_none());
        assert_eq!(tbs_bits(TbsParams { mcs: 31, nof_prbs: 10, nof_symbols: 12, nof_dmrs_symbols: 1 }), 0);
    }
}

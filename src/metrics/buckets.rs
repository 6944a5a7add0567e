/// Number of bucket boundaries in [`TIMING_BUCKETS`].
pub const BUCKET_COUNT: usize = 75;

/// Bucket boundaries for transaction CPU time, in microseconds.
///
/// Renard R20 preferred numbers from 100 to 500 000 inclusive: twenty steps
/// per decade on a log-like grid, so relative resolution is a constant ~12%.
/// The table is part of the on-disk snapshot format — every snapshot ever
/// written carries one cumulative count per boundary — so its shape must
/// never change.
pub const TIMING_BUCKETS: [f64; BUCKET_COUNT] = [
    100.0, 112.0, 125.0, 140.0, 160.0, 180.0, 200.0, 224.0, 250.0, 280.0, //
    315.0, 355.0, 400.0, 450.0, 500.0, 560.0, 630.0, 710.0, 800.0, 900.0, //
    1_000.0, 1_120.0, 1_250.0, 1_400.0, 1_600.0, 1_800.0, 2_000.0, 2_240.0, 2_500.0, 2_800.0, //
    3_150.0, 3_550.0, 4_000.0, 4_500.0, 5_000.0, 5_600.0, 6_300.0, 7_100.0, 8_000.0, 9_000.0, //
    10_000.0, 11_200.0, 12_500.0, 14_000.0, 16_000.0, 18_000.0, 20_000.0, 22_400.0, 25_000.0,
    28_000.0, //
    31_500.0, 35_500.0, 40_000.0, 45_000.0, 50_000.0, 56_000.0, 63_000.0, 71_000.0, 80_000.0,
    90_000.0, //
    100_000.0, 112_000.0, 125_000.0, 140_000.0, 160_000.0, 180_000.0, 200_000.0, 224_000.0,
    250_000.0, 280_000.0, //
    315_000.0, 355_000.0, 400_000.0, 450_000.0, 500_000.0,
];

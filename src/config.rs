//! System-wide tunables, threaded explicitly through a [`crate::Context`]
//! rather than held in process globals.
//!
//! The original C keeps these as a scattered set of `s_vqec_*` file-scope
//! globals (`vqec_gap_reporter.c`'s `s_vqec_error_repair_policer_*` knobs,
//! `vqec_dp_oshim_read_api.c`'s `iobuf_recv_timeout_max`/`max_iobuf_cnt`,
//! the dataplane's `MP_MAX_TSPAKS_PER_TLV`/`num_patpmt` TSRAP knobs). Per
//! Design Note "Global mutable state" in spec.md §9, this crate collects
//! them into one plain struct so a test harness can build several
//! independent configurations without a process restart.

use std::time::Duration;

/// System-wide defaults and limits, one instance per [`crate::Context`].
#[derive(Clone, Debug)]
pub struct SysConfig {
    /// Per-source [`crate::pcm::Pcm`] capacity (max buffered ext-seq span).
    pub pcm_capacity: u32,
    /// [`crate::pcm::Pcm::next_ready`]'s gap-wait deadline before a missing
    /// position is declared permanently lost.
    pub gap_wait_deadline: Duration,
    /// Cap on Generic NACK FCIs per feedback packet; see
    /// [`crate::gap_reporter::build_generic_nack`].
    pub fci_max: usize,
    /// Per-tuner [`crate::sink::Sink`] queue depth.
    pub sink_capacity: usize,
    /// Upper bound on simultaneously live tuners (sizes the thread-local
    /// waiter pool per spec.md §5).
    pub max_tuners: usize,
    /// Clamp applied to a caller's requested iobuf count in
    /// [`crate::tuner::TunerTable::read`].
    pub max_iobuf_cnt: usize,
    /// Clamp applied to a caller's requested timeout in
    /// [`crate::tuner::TunerTable::read`].
    pub iobuf_recv_timeout_max: Duration,
    /// Number of PAT/PMT copies to prepend in a TSRAP splice, per
    /// spec.md §4.7 point 4.
    pub num_patpmt: u32,
    /// Number of times to replicate the whole TSRAP burst back-to-back
    /// (`app_paks_per_rcc` in the original source), for receivers that
    /// want a redundant burst.
    pub app_paks_per_rcc: u32,
    /// Global error-repair enable; a disabled system never sends NACKs
    /// (spec.md §4.3 step 1).
    pub er_enable: bool,
    /// Global RCC/TSRAP splice enable.
    pub rcc_enable: bool,
    /// Default error-repair policer `(rate, burst)`, used unless a
    /// channel descriptor overrides it.
    pub default_er_policer: (u32, u32),
}

impl Default for SysConfig {
    fn default() -> Self {
        SysConfig {
            pcm_capacity: 4096,
            gap_wait_deadline: Duration::from_millis(20),
            fci_max: crate::gap_reporter::DEFAULT_FCI_MAX,
            sink_capacity: 512,
            max_tuners: 256,
            max_iobuf_cnt: 64,
            iobuf_recv_timeout_max: Duration::from_secs(5),
            num_patpmt: 1,
            app_paks_per_rcc: 1,
            er_enable: true,
            rcc_enable: true,
            default_er_policer: (5_000, 100),
        }
    }
}

use tracing_subscriber::EnvFilter;

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Round up to the host page size
pub fn page_align(value: usize) -> usize {
    align_up(value, page_size::get())
}

/// Install the fmt subscriber the way every binary in this crate does
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

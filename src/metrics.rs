use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec, TextEncoder};

lazy_static! {
    pub static ref MAGIC_PACKETS: IntCounterVec = register_int_counter_vec!(
        "wol_magic_packets_total",
        "Magic packet send attempts, by result.",
        &["result"]
    )
    .unwrap();
    pub static ref HOST_CHECKS: IntCounterVec = register_int_counter_vec!(
        "wol_host_checks_total",
        "Host status checks, by result.",
        &["result"]
    )
    .unwrap();
    pub static ref RATE_LIMITED: IntCounterVec = register_int_counter_vec!(
        "wol_rate_limited_total",
        "Requests refused by the per-session rate limit, by action.",
        &["action"]
    )
    .unwrap();
}

pub fn gather_text() -> Result<String, prometheus::Error> {
    TextEncoder::new().encode_to_string(&prometheus::gather())
}

#[cfg(test)]
mod tests {
    use crate::metrics::*;

    #[test]
    fn test_counters_are_exported() {
        MAGIC_PACKETS.with_label_values(&["ok"]).inc();
        HOST_CHECKS.with_label_values(&["down"]).inc();
        RATE_LIMITED.with_label_values(&["HOST.WAKEUP"]).inc();
        let text = gather_text().unwrap();
        assert!(text.contains("wol_magic_packets_total{result=\"ok\"}"));
        assert!(text.contains("wol_host_checks_total{result=\"down\"}"));
        assert!(text.contains("wol_rate_limited_total{action=\"HOST.WAKEUP\"}"));
    }
}

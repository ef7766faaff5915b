//! Validation of `tc qdisc ... netem` commands.
//!
//! Network conditions are applied by running the command as root inside the
//! unit, so only a fixed grammar of netem parameters is accepted.

const PREFIX: [&str; 7] = ["tc", "qdisc", "add", "dev", "eth0", "root", "netem"];
const PARAMS: [&str; 6] = ["delay", "loss", "duplicate", "corrupt", "reorder", "rate"];
const DISTRIBUTIONS: [&str; 4] = ["normal", "pareto", "paretonormal", "uniform"];

/// Returns true if `command` is a netem invocation built only from known parameters.
pub fn is_safe_netem(command: &str) -> bool {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    if tokens.len() < PREFIX.len() || tokens[..PREFIX.len()] != PREFIX {
        return false;
    }
    let mut rest = &tokens[PREFIX.len()..];
    while let Some((param, tail)) = rest.split_first() {
        if !PARAMS.contains(param) {
            return false;
        }
        let end = tail
            .iter()
            .position(|t| PARAMS.contains(t))
            .unwrap_or(tail.len());
        if !valid_value(param, &tail[..end]) {
            return false;
        }
        rest = &tail[end..];
    }
    true
}

fn valid_value(param: &str, value: &[&str]) -> bool {
    match (param, value) {
        ("delay", [d]) => is_millis(d),
        ("delay", [d, j]) => is_millis(d) && is_millis(j),
        ("delay", [d, "distribution", dist]) => is_millis(d) && DISTRIBUTIONS.contains(dist),
        ("delay", [d, j, "distribution", dist]) => {
            is_millis(d) && is_millis(j) && DISTRIBUTIONS.contains(dist)
        }
        ("loss" | "duplicate" | "corrupt", [p]) => is_percent(p),
        ("reorder", [a, b]) => is_percent(a) && is_percent(b),
        ("rate", [r]) => ["kbit", "mbit", "gbit"]
            .iter()
            .any(|unit| r.strip_suffix(unit).is_some_and(is_digits)),
        _ => false,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_millis(s: &str) -> bool {
    s.strip_suffix("ms").is_some_and(is_digits)
}

fn is_percent(s: &str) -> bool {
    match s.strip_suffix('%') {
        Some(n) => match n.split_once('.') {
            Some((whole, frac)) => is_digits(whole) && is_digits(frac),
            None => is_digits(n),
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_known_parameters() {
        assert!(is_safe_netem("tc qdisc add dev eth0 root netem delay 100ms"));
        assert!(is_safe_netem(
            "tc qdisc add dev eth0 root netem delay 100ms 10ms distribution normal loss 0.5%"
        ));
        assert!(is_safe_netem("tc qdisc add dev eth0 root netem reorder 25% 50% rate 10mbit"));
        assert!(is_safe_netem("tc qdisc add dev eth0 root netem"));
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        assert!(!is_safe_netem("tc qdisc add dev eth1 root netem delay 100ms"));
        assert!(!is_safe_netem("rm -rf /"));
    }

    #[test]
    fn test_rejects_unknown_or_malformed_values() {
        assert!(!is_safe_netem("tc qdisc add dev eth0 root netem delay 100"));
        assert!(!is_safe_netem("tc qdisc add dev eth0 root netem loss 5"));
        assert!(!is_safe_netem("tc qdisc add dev eth0 root netem limit 1000"));
        assert!(!is_safe_netem("tc qdisc add dev eth0 root netem delay 1ms; reboot"));
        assert!(!is_safe_netem("tc qdisc add dev eth0 root netem rate 10tbit"));
    }
}

use super::*;

#[test]
fn test_duration_roundtrip() {
    let d = Duration::from_millis(1500);
    let j = duration_to_jiffies(d);
    assert_eq!(j, JIFFIES_PER_SEC + JIFFIES_PER_SEC / 2);
    let back = jiffies_to_duration(j);
    assert_eq!(back.as_millis(), 1500);
}

#[test]
fn test_ntp_roundtrip() {
    let jiffies = 5 * JIFFIES_PER_SEC + 12_345;
    let ntp = NtpTime::from_jiffies(jiffies);
    let back = ntp.to_jiffies();
    // sub-jiffy rounding in the fixed-point fraction conversion.
    assert!((back as i64 - jiffies as i64).abs() <= 1);
}

#[test]
fn test_ntp_epoch_offset() {
    let ntp = NtpTime::from_jiffies(0);
    assert_eq!(ntp.0 >> 32, NTP_UNIX_EPOCH_OFFSET_SECS);
}

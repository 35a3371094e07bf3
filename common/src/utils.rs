use crate::config::STATUS_DETAIL_MAX_BYTES;

// Render an integer quantity of base units with `decimals` places,
// trailing zeros trimmed
pub fn format_coin(value: u64, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let scale = 10u64.pow(decimals as u32);
    let integer = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return integer.to_string();
    }

    let digits = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", integer, digits.trim_end_matches('0'))
}

// Clamp an include-status or submit-error detail to the wire limit,
// keeping the cut on a char boundary
pub fn truncate_detail(detail: &str) -> String {
    if detail.len() <= STATUS_DETAIL_MAX_BYTES {
        return detail.to_string();
    }

    let mut end = STATUS_DETAIL_MAX_BYTES;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    detail[..end].to_string()
}

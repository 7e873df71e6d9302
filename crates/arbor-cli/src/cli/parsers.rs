use arbor_core::models::Grant;

pub(super) fn parse_min_one_u32(raw: &str) -> std::result::Result<u32, String> {
    let value = raw
        .parse::<u32>()
        .map_err(|_| format!("invalid integer value '{raw}'"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}

pub(super) fn parse_min_one_usize(raw: &str) -> std::result::Result<usize, String> {
    let value = raw
        .parse::<usize>()
        .map_err(|_| format!("invalid integer value '{raw}'"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}

pub(super) fn parse_grant(raw: &str) -> std::result::Result<Grant, String> {
    raw.parse::<Grant>().map_err(|err| err.to_string())
}

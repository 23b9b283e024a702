use std::cmp::Ordering;

/// Compares dotted versions part by part: numeric parts numerically,
/// anything else lexically. Missing trailing parts count as zero, so
/// "1.49" == "1.49.0".
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left_parts = split(left);
    let right_parts = split(right);
    let len = left_parts.len().max(right_parts.len());

    for i in 0..len {
        let l = left_parts.get(i).copied().unwrap_or("0");
        let r = right_parts.get(i).copied().unwrap_or("0");
        let ordering = compare_part(l, r);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Whether `supported` names the `detected` game build. A supported
/// entry matches when its parts are a prefix of the detected parts:
/// "1.49" matches "1.49.2.15s" but not "1.4" or "1.50".
pub fn game_version_matches(supported: &str, detected: &str) -> bool {
    let supported = split(supported);
    let detected = split(detected);
    !supported.is_empty()
        && supported.len() <= detected.len()
        && supported
            .iter()
            .zip(detected.iter())
            .all(|(s, d)| compare_part(s, d) == Ordering::Equal)
}

fn split(version: &str) -> Vec<&str> {
    version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split(['.', '-', '_'])
        .filter(|part| !part.is_empty())
        .collect()
}

fn compare_part(left: &str, right: &str) -> Ordering {
    let (l_num, l_rest) = leading_number(left);
    let (r_num, r_rest) = leading_number(right);
    match (l_num, r_num) {
        (Some(l), Some(r)) => l.cmp(&r).then_with(|| l_rest.cmp(r_rest)),
        _ => left.cmp(right),
    }
}

fn leading_number(part: &str) -> (Option<u64>, &str) {
    let digits = part.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return (None, part);
    }
    (part[..digits].parse().ok(), &part[digits..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_parts_compare_numerically() {
        assert_eq!(compare_versions("5.1", "5.2"), Ordering::Less);
        assert_eq!(compare_versions("5.10", "5.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.49", "1.49.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.49.2.15s", "1.49.2.3s"), Ordering::Greater);
    }

    #[test]
    fn supported_entry_is_a_prefix_of_the_detected_build() {
        assert!(game_version_matches("1.49", "1.49"));
        assert!(game_version_matches("1.49", "1.49.2.15s"));
        assert!(!game_version_matches("1.49", "1.50"));
        assert!(!game_version_matches("1.49.3", "1.49"));
        assert!(!game_version_matches("", "1.49"));
    }
}

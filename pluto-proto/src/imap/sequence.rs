/// Parses an IMAP sequence-number set (`1`, `2:4`, `1,3:*`, `*`) against a
/// mailbox of `max` messages. `*` is the highest existing number. Returns
/// the sorted, deduplicated 1-based positions, or `None` when the set is
/// syntactically invalid or references a number outside `1..=max`.
pub fn parse_sequence_set(set: &str, max: usize) -> Option<Vec<usize>> {
    if set.is_empty() || max == 0 {
        return None;
    }

    let mut positions = Vec::new();
    for item in set.split(',') {
        match item.split_once(':') {
            None => positions.push(parse_number(item, max)?),
            Some((lo, hi)) => {
                let lo = parse_number(lo, max)?;
                let hi = parse_number(hi, max)?;
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                positions.extend(lo..=hi);
            }
        }
    }
    positions.sort_unstable();
    positions.dedup();
    Some(positions)
}

fn parse_number(token: &str, max: usize) -> Option<usize> {
    if token == "*" {
        return Some(max);
    }
    let n: usize = token.parse().ok()?;
    if n == 0 || n > max {
        return None;
    }
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_numbers_ranges_and_star() {
        assert_eq!(parse_sequence_set("1", 5), Some(vec![1]));
        assert_eq!(parse_sequence_set("2:4", 5), Some(vec![2, 3, 4]));
        assert_eq!(parse_sequence_set("4:2", 5), Some(vec![2, 3, 4]));
        assert_eq!(parse_sequence_set("*", 5), Some(vec![5]));
        assert_eq!(parse_sequence_set("3:*", 5), Some(vec![3, 4, 5]));
        assert_eq!(parse_sequence_set("1,3,3:4", 5), Some(vec![1, 3, 4]));
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert_eq!(parse_sequence_set("6", 5), None);
        assert_eq!(parse_sequence_set("0", 5), None);
        assert_eq!(parse_sequence_set("", 5), None);
        assert_eq!(parse_sequence_set("a", 5), None);
        assert_eq!(parse_sequence_set("1:2:3", 5), None);
        assert_eq!(parse_sequence_set("1", 0), None);
    }
}

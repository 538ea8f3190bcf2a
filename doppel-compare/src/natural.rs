// SPDX-License-Identifier: AGPL-3.0-or-later
//! Natural string ordering: "file2" sorts before "file10"

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Case-insensitive natural comparison. Runs of ASCII digits compare by
/// value. Strings that only differ in case or leading zeros fall back to a
/// plain byte comparison, so the result is a total order.
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    compare_folded(a, b).then_with(|| a.cmp(b))
}

fn compare_folded(a: &str, b: &str) -> Ordering {
    let mut x = a.chars().peekable();
    let mut y = b.chars().peekable();
    loop {
        let ord = match (x.peek().copied(), y.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(c), Some(d)) if c.is_ascii_digit() && d.is_ascii_digit() => {
                compare_digit_runs(&take_digits(&mut x), &take_digits(&mut y))
            }
            (Some(c), Some(d)) => {
                x.next();
                y.next();
                fold(c).cmp(&fold(d))
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_by_value() {
        assert_eq!(compare_natural("file2", "file10"), Ordering::Less);
        assert_eq!(compare_natural("file10", "file9"), Ordering::Greater);
        assert_eq!(compare_natural("v1.10", "v1.9"), Ordering::Greater);
        assert_eq!(compare_natural("99999999999999999999999", "100000000000000000000000"), Ordering::Less);
    }

    #[test]
    fn test_case_and_zero_ties_are_stable() {
        assert_eq!(compare_natural("abc", "ABD"), Ordering::Less);
        assert_ne!(compare_natural("Readme", "readme"), Ordering::Equal);
        assert_ne!(compare_natural("a01", "a1"), Ordering::Equal);
        assert_eq!(compare_natural("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_sorting() {
        let mut names = vec!["img12.png", "IMG3.png", "img1.png", "img", "img_a.png", "Img2.png"];
        names.sort_by(|a, b| compare_natural(a, b));
        assert_eq!(names, vec!["img", "img1.png", "Img2.png", "IMG3.png", "img12.png", "img_a.png"]);
    }

    #[test]
    fn test_strict_weak_ordering() {
        let sample = [
            "", "a", "A", "a1", "a01", "a2", "a10", "a-b", "a b", "a!", "ab", "aB", "b", "10", "9", "009", "_x", "z9z",
            "z10a", "é", "É1",
        ];
        for a in sample {
            assert_eq!(compare_natural(a, a), Ordering::Equal);
            for b in sample {
                assert_eq!(compare_natural(a, b), compare_natural(b, a).reverse(), "{a} vs {b}");
                for c in sample {
                    if compare_natural(a, b) == Ordering::Less && compare_natural(b, c) == Ordering::Less {
                        assert_eq!(compare_natural(a, c), Ordering::Less, "{a} < {b} < {c}");
                    }
                }
            }
        }
    }
}

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// One run of a file name: either text or a decimal number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalChunk {
    Text(String),
    Number(u128),
}

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern is valid"))
}

/// Sort key that orders digit runs numerically, so `img2` sorts before
/// `img10`. Text runs compare case-sensitively.
pub fn natural_keys(text: &str) -> Vec<NaturalChunk> {
    let mut keys = Vec::new();
    let mut last = 0;
    for m in digit_runs().find_iter(text) {
        keys.push(NaturalChunk::Text(text[last..m.start()].to_owned()));
        keys.push(match m.as_str().parse::<u128>() {
            Ok(n) => NaturalChunk::Number(n),
            Err(_) => NaturalChunk::Text(m.as_str().to_owned()),
        });
        last = m.end();
    }
    keys.push(NaturalChunk::Text(text[last..].to_owned()));
    keys
}

/// Sort names or paths in place by [`natural_keys`] of their full text.
pub fn natural_sort<T: AsRef<Path>>(items: &mut [T]) {
    items.sort_by_cached_key(|item| natural_keys(&item.as_ref().to_string_lossy()));
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn numbers_compare_numerically() {
        let mut names = vec!["img10.png", "img2.png", "img1.png"];
        natural_sort(&mut names);
        assert_eq!(names, vec!["img1.png", "img2.png", "img10.png"]);
    }

    #[test]
    fn leading_zeros_do_not_matter() {
        assert_eq!(natural_keys("f007"), natural_keys("f7"));
    }

    #[test]
    fn keys_alternate_text_and_numbers() {
        assert_eq!(
            natural_keys("t01z2"),
            vec![
                NaturalChunk::Text("t".into()),
                NaturalChunk::Number(1),
                NaturalChunk::Text("z".into()),
                NaturalChunk::Number(2),
                NaturalChunk::Text(String::new()),
            ]
        );
    }

    #[test]
    fn sorts_paths() {
        let mut paths = vec![PathBuf::from("a/img10.png"), PathBuf::from("a/img9.png")];
        natural_sort(&mut paths);
        assert_eq!(paths, vec![PathBuf::from("a/img9.png"), PathBuf::from("a/img10.png")]);
    }

    #[test]
    fn multi_level_numbering() {
        let mut names = vec!["s2/f10", "s10/f1", "s2/f9"];
        natural_sort(&mut names);
        assert_eq!(names, vec!["s2/f9", "s2/f10", "s10/f1"]);
    }
}

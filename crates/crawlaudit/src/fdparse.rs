//! Directory-listing line parser.
//!
//! Four listing grammars are recognized, tried in order:
//!
//! 1. long listing of a directory (`drwx------ 2 tpb ccsstaff 512 Oct 17 13:54 subdir1`)
//! 2. long listing of a file (`-rw------- 1 tpb ccsstaff 2 Nov 20 2013 hello_1`)
//! 3. tab-delimited `DIRECTORY\t<path>` rows
//! 4. tab-delimited `FILE\t<path>\t...\t<cart>\t<cos>\t...` rows
//!
//! Anything else (headers, `path:` banners, blank lines) yields `None`.

use crate::checkable::EntryKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// What one listing line says about a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryDescriptor {
    pub kind: EntryKind,
    pub path: String,
    pub cos: String,
    pub cart: Option<String>,
}

type Matcher = fn(&str) -> Option<EntryDescriptor>;

/// Matchers in priority order; the first hit wins.
pub const MATCHERS: &[(&str, Matcher)] = &[
    ("long_directory", long_directory),
    ("long_file", long_file),
    ("tab_directory", tab_directory),
    ("tab_file", tab_file),
];

const MONTHS: &str = "Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec";

// Permission string, then anything up to `Mon DD HH:MM` or `Mon DD YYYY`, then the name.
static LONG_DIRECTORY: Lazy<Regex> = Lazy::new(|| long_listing_regex('d'));
static LONG_FILE: Lazy<Regex> = Lazy::new(|| long_listing_regex('-'));

fn long_listing_regex(lead: char) -> Regex {
    let pattern = format!(
        r"^{}[rwxsStTl-]{{9}}[.+@]?\s+.*?\s(?:{})\s+\d{{1,2}}\s+(?:\d{{1,2}}:\d{{2}}|\d{{4}})\s+(\S+)\s*$",
        regex::escape(&lead.to_string()),
        MONTHS
    );
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid long listing pattern: {e}"))
}

/// Parse one listing line.
pub fn parse(line: &str) -> Option<EntryDescriptor> {
    MATCHERS.iter().find_map(|(_, matcher)| matcher(line))
}

/// Name of the grammar that accepts `line`, if any.
pub fn grammar_of(line: &str) -> Option<&'static str> {
    MATCHERS
        .iter()
        .find(|(_, matcher)| matcher(line).is_some())
        .map(|(name, _)| *name)
}

pub fn long_directory(line: &str) -> Option<EntryDescriptor> {
    long_listing(&LONG_DIRECTORY, line, EntryKind::Directory)
}

pub fn long_file(line: &str) -> Option<EntryDescriptor> {
    long_listing(&LONG_FILE, line, EntryKind::File)
}

fn long_listing(re: &Regex, line: &str, kind: EntryKind) -> Option<EntryDescriptor> {
    let caps = re.captures(line.trim_end_matches(['\r', '\n']))?;
    Some(EntryDescriptor {
        kind,
        path: caps.get(1)?.as_str().to_string(),
        cos: String::new(),
        cart: None,
    })
}

pub fn tab_directory(line: &str) -> Option<EntryDescriptor> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    if fields.next()? != "DIRECTORY" {
        return None;
    }
    let path = fields.next()?.trim();
    if path.is_empty() {
        return None;
    }
    Some(EntryDescriptor {
        kind: EntryKind::Directory,
        path: path.to_string(),
        cos: String::new(),
        cart: None,
    })
}

pub fn tab_file(line: &str) -> Option<EntryDescriptor> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.first() != Some(&"FILE") {
        return None;
    }
    let path = fields.get(1)?.trim();
    if path.is_empty() {
        return None;
    }
    // A blank cart is reported as an empty string, not as missing.
    let cart = fields.get(5).map(|c| c.trim()).unwrap_or_default();
    let cos = fields.get(6).map(|c| c.trim()).unwrap_or_default();
    Some(EntryDescriptor {
        kind: EntryKind::File,
        path: path.to_string(),
        cos: cos.to_string(),
        cart: Some(cart.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect(kind: EntryKind, path: &str, cos: &str, cart: Option<&str>) -> EntryDescriptor {
        EntryDescriptor {
            kind,
            path: path.to_string(),
            cos: cos.to_string(),
            cart: cart.map(str::to_string),
        }
    }

    #[test]
    fn test_long_directory_recent_date() {
        assert_eq!(
            parse("drwx------ 2 tpb ccsstaff 512 Oct 17 13:54 subdir1"),
            Some(expect(EntryKind::Directory, "subdir1", "", None))
        );
    }

    #[test]
    fn test_long_directory_with_year() {
        assert_eq!(
            parse("drwxr-x---    2 tpb       ccsstaff         512 Dec 17  2013 old_dir"),
            Some(expect(EntryKind::Directory, "old_dir", "", None))
        );
    }

    #[test]
    fn test_long_file() {
        assert_eq!(
            parse("-rw-------    1 tpb       ccsstaff           2 Nov 20 15:25 hello_1"),
            Some(expect(EntryKind::File, "hello_1", "", None))
        );
        assert_eq!(
            parse("-rw-r--r-- 1 tpb ccsstaff 6001 X1234500 1048576 Jan  3 2014 data.tar"),
            Some(expect(EntryKind::File, "data.tar", "", None))
        );
    }

    #[test]
    fn test_tab_directory() {
        assert_eq!(
            parse("DIRECTORY\t/home/tpb/apache \t0\t0\t0"),
            Some(expect(EntryKind::Directory, "/home/tpb/apache", "", None))
        );
    }

    #[test]
    fn test_tab_file_blank_cart() {
        assert_eq!(
            parse("FILE\t/a/b\t0\t0\t0\t\t6001\t0\t1\t..."),
            Some(expect(EntryKind::File, "/a/b", "6001", Some("")))
        );
    }

    #[test]
    fn test_tab_file_with_cart() {
        assert_eq!(
            parse("FILE\t/home/tpb/x.tar\t1048576\t1048576\t3115+0\tX1234500\t5081\t0\t1"),
            Some(expect(EntryKind::File, "/home/tpb/x.tar", "5081", Some("X1234500")))
        );
    }

    #[test]
    fn test_tab_file_short_row_has_blank_fields() {
        assert_eq!(
            parse("FILE\t/a/c"),
            Some(expect(EntryKind::File, "/a/c", "", Some("")))
        );
    }

    #[test]
    fn test_non_entries() {
        assert_eq!(parse("/home/tpb/cli_test:"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("total 24"), None);
        assert_eq!(parse("lrwxrwxrwx 1 tpb ccsstaff 9 Oct 17 13:54 link -> target"), None);
        assert_eq!(parse("DIRECTORY"), None);
        assert_eq!(parse("FILE\t\t0"), None);
        assert_eq!(parse("FILES\t/a/b"), None);
    }

    #[test]
    fn test_matchers_are_independent() {
        let line = "drwx------ 2 tpb ccsstaff 512 Oct 17 13:54 subdir1";
        assert!(long_directory(line).is_some());
        assert!(long_file(line).is_none());
        assert!(tab_directory(line).is_none());
        assert!(tab_file(line).is_none());

        assert_eq!(grammar_of(line), Some("long_directory"));
        assert_eq!(grammar_of("FILE\t/a/b"), Some("tab_file"));
        assert_eq!(grammar_of("DIRECTORY\t/a"), Some("tab_directory"));
        assert_eq!(grammar_of("/home/tpb/cli_test:"), None);
    }

    #[test]
    fn test_trailing_newline_ignored() {
        assert_eq!(
            parse("-rw------- 1 tpb ccsstaff 2 Nov 20 15:25 hello_2\n"),
            Some(expect(EntryKind::File, "hello_2", "", None))
        );
        assert_eq!(
            parse("DIRECTORY\t/x\r\n"),
            Some(expect(EntryKind::Directory, "/x", "", None))
        );
    }
}

//! Headers container, with ordered insertion and case-preserving names.

use std::fmt;
use std::slice;

/// One header line: the lowercased name used for lookup, the casing the
/// peer (or handler) originally used, and the value.
#[derive(Clone, Debug)]
struct Entry {
    lower: String,
    name: String,
    value: String,
}

/// An ordered list of headers.
///
/// Lookup is ASCII case-insensitive. The casing of the first occurrence of a
/// name is preserved and echoed back on the wire, even when a later `set`
/// replaces the value. `Set-Cookie` is the one name allowed to repeat; every
/// other duplicate replaces the earlier value.
#[derive(Clone, Default)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers {
            entries: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(cap: usize) -> Headers {
        Headers {
            entries: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets a header, replacing any existing value for the same name.
    ///
    /// `Set-Cookie` appends instead, since clients expect one line per
    /// cookie.
    pub fn set<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();
        let lower = name.to_ascii_lowercase();

        if lower != "set-cookie" {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.lower == lower) {
                entry.value = value;
                return;
            }
        }
        self.entries.push(Entry { lower, name, value });
    }

    /// The value for `name`, case-insensitive. For repeated `Set-Cookie`,
    /// the first value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.lower.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.lower.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every value stored under `name`. Returns whether anything
    /// was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.lower.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Iterates `(original-name, value)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.entries.iter(),
        }
    }
}

pub struct Iter<'a> {
    inner: slice::Iter<'a, Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(n, v)| (n, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Headers;

    #[test]
    fn case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain");
        assert_eq!(Some("text/plain"), headers.get("content-type"));
        assert_eq!(Some("text/plain"), headers.get("CONTENT-TYPE"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn replace_keeps_first_casing() {
        let mut headers = Headers::new();
        headers.set("X-Trace-ID", "a");
        headers.set("x-trace-id", "b");
        assert_eq!(1, headers.len());
        assert_eq!(Some("b"), headers.get("x-trace-id"));
        let (name, value) = headers.iter().next().unwrap();
        assert_eq!("X-Trace-ID", name);
        assert_eq!("b", value);
    }

    #[test]
    fn set_cookie_repeats() {
        let mut headers = Headers::new();
        headers.set("Set-Cookie", "a=1");
        headers.set("Set-Cookie", "b=2");
        assert_eq!(2, headers.len());
        let cookies: Vec<_> = headers.get_all("set-cookie").collect();
        assert_eq!(vec!["a=1", "b=2"], cookies);
    }

    #[test]
    fn insertion_order_preserved() {
        let mut headers = Headers::new();
        headers.set("B", "2");
        headers.set("A", "1");
        headers.set("C", "3");
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(vec!["B", "A", "C"], names);
    }

    #[test]
    fn remove_all_occurrences() {
        let mut headers = Headers::new();
        headers.set("Set-Cookie", "a=1");
        headers.set("Set-Cookie", "b=2");
        assert!(headers.remove("set-cookie"));
        assert!(headers.is_empty());
        assert!(!headers.remove("set-cookie"));
    }
}

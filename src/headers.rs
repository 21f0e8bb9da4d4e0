//! HTTP header list used throughout the cache.
//!
//! Headers are kept as an ordered multimap so that repeated fields survive a
//! round trip through the index, and lookups are ASCII case-insensitive as
//! required for HTTP field names.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    headers: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first header with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Removes every header with the given name.
    pub fn remove_all(&mut self, name: &str) {
        self.headers
            .retain(|header| !header.name.eq_ignore_ascii_case(name));
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Header) -> bool) {
        self.headers.retain(|header| keep(header));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Serializes the list as `name:value` lines for index storage.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for header in &self.headers {
            out.push_str(&header.name);
            out.push(':');
            out.push_str(&header.value);
            out.push('\n');
        }
        out
    }

    /// Parses a snapshot produced by [`HeaderList::serialize`]. Lines without
    /// a colon are skipped.
    pub fn deserialize(serialized: &str) -> Self {
        let mut headers = HeaderList::new();

        for line in serialized.split('\n') {
            let Some(index) = line.find(':') else {
                continue;
            };

            let name = line[..index].trim();
            let value = line[index + 1..].trim();
            if name.is_empty() {
                continue;
            }

            headers.append(name, value);
        }

        headers
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = HeaderList::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

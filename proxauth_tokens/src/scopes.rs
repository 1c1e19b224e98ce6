use std::{collections::btree_set, collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{Scope, ScopeRef};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopesDto {
    String(String),
    Array(Vec<String>),
}

impl From<Option<ScopesDto>> for ScopeSet {
    fn from(dto: Option<ScopesDto>) -> Self {
        match dto {
            Some(ScopesDto::String(s)) => ScopeSet::parse(&s),
            Some(ScopesDto::Array(arr)) => arr.into_iter().collect(),
            None => ScopeSet::new(),
        }
    }
}

impl From<ScopeSet> for ScopesDto {
    fn from(s: ScopeSet) -> Self {
        ScopesDto::String(s.to_string())
    }
}

/// An unordered set of scopes identifying what a token authorizes
///
/// Two scope sets holding the same scopes are equal and hash identically
/// regardless of the order in which the scopes were supplied, which makes
/// this type suitable as a cache key.
///
/// ```
/// use proxauth_tokens::ScopeSet;
///
/// let a: ScopeSet = ["User.Read", "openid"].into_iter().collect();
/// let b = ScopeSet::parse("openid User.Read");
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "User.Read openid");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(from = "Option<ScopesDto>", into = "ScopesDto")]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    /// Produces an empty scope set
    #[inline]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Produces a scope set holding a single scope
    pub fn single(scope: impl Into<Scope>) -> Self {
        let mut set = Self::new();
        set.insert(scope.into());
        set
    }

    /// Parses a whitespace-separated list of scopes
    pub fn parse(s: &str) -> Self {
        s.split_whitespace().collect()
    }

    /// Adds a scope to the scope set
    ///
    /// Blank scopes are ignored.
    #[inline]
    pub fn insert(&mut self, scope: Scope) {
        if !scope.as_str().trim().is_empty() {
            self.0.insert(scope);
        }
    }

    /// Checks whether the set contains `scope`
    #[inline]
    pub fn contains(&self, scope: &ScopeRef) -> bool {
        self.0.contains(scope)
    }

    /// The number of distinct scopes in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no scopes at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Produces an iterator of the scopes in this set, in sorted order
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        self.into_iter()
    }

    /// Copies the scopes out as plain strings, as identity SDKs expect them
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().map(|s| s.as_str().to_owned()).collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        iter.into_iter()
            .map(|s| Scope::new(s.trim().to_owned()))
            .collect()
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter()
            .map(|s| Scope::new(s.trim().to_owned()))
            .collect()
    }
}

impl Extend<Scope> for ScopeSet {
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Scope>,
    {
        for scope in iter {
            self.insert(scope);
        }
    }
}

impl IntoIterator for ScopeSet {
    type Item = Scope;
    type IntoIter = btree_set::IntoIter<Scope>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An iterator over a set of borrowed scopes
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Scope>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ScopeRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|x| x.as_ref())
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a ScopeRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Iter {
            iter: self.0.iter(),
        }
    }
}

//! Packaging identifiers inferred from store directory names.
//!
//! Store names follow the derivation-name convention `<name>-<version>`,
//! where the version starts at the first `-` followed by a digit. Names
//! that carry no such segment still get a usable identifier: the version
//! is reported as `unknown` and a disambiguator is always attached.

use crate::closure::ClosureMember;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Version string rendered for members whose name carries no version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Outcome of splitting a raw store name into name and version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParsedName {
    /// A version-shaped suffix was found.
    Parsed {
        /// Human package name.
        name: String,
        /// Version string, including any output suffix such as `-dev`.
        version: String,
    },
    /// No version-shaped suffix; the whole raw name is the package name.
    Unknown {
        /// Human package name.
        name: String,
    },
}

impl ParsedName {
    /// The package name half.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Parsed { name, .. } | Self::Unknown { name } => name,
        }
    }

    /// The version half, or `None` when it could not be inferred.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Parsed { version, .. } => Some(version),
            Self::Unknown { .. } => None,
        }
    }
}

/// Split a raw store name (the part after `<hash>-`) into name and version.
///
/// The version starts at the first `-` followed by a digit, matching Nix's
/// `builtins.parseDrvName`, so identifiers agree with the names `nix` shows
/// for the same path. `foo-2.0-patch-3` keeps `2.0-patch-3` as its version
/// rather than splitting off only the trailing `-3`.
///
/// Never fails: malformed names become [`ParsedName::Unknown`].
///
/// # Examples
///
/// ```
/// use nix2pkg_packager::naming::{ParsedName, parse_name};
///
/// assert_eq!(
///     parse_name("openssl-3.0.7-dev"),
///     ParsedName::Parsed { name: "openssl".into(), version: "3.0.7-dev".into() },
/// );
/// assert_eq!(parse_name("hello"), ParsedName::Unknown { name: "hello".into() });
/// ```
#[must_use]
pub fn parse_name(raw: &str) -> ParsedName {
    let split = raw
        .char_indices()
        .zip(raw.chars().skip(1))
        .find(|&((_, c), next)| c == '-' && next.is_ascii_digit())
        .and_then(|((idx, _), _)| Some((raw.get(..idx)?, raw.get(idx + 1..)?)));

    match split {
        Some((name, version)) if !name.is_empty() => ParsedName::Parsed {
            name: name.to_owned(),
            version: version.to_owned(),
        },
        _ => ParsedName::Unknown {
            name: raw.to_owned(),
        },
    }
}

/// A name/version pair made unique within one packaging run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackagingIdentifier {
    name: String,
    version: String,
    disambiguator: Option<u32>,
}

impl PackagingIdentifier {
    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string; [`UNKNOWN_VERSION`] when none was inferred.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Collision counter, present from the second occurrence onwards and
    /// always for unknown versions.
    #[must_use]
    pub fn disambiguator(&self) -> Option<u32> {
        self.disambiguator
    }

    /// Version with the disambiguator folded in, as handed to backends.
    #[must_use]
    pub fn package_version(&self) -> String {
        match self.disambiguator {
            Some(n) => format!("{}-{n}", self.version),
            None => self.version.clone(),
        }
    }
}

impl fmt::Display for PackagingIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)?;
        if let Some(n) = self.disambiguator {
            write!(f, "-{n}")?;
        }
        Ok(())
    }
}

/// Names already handed out during one run.
///
/// Owned by the caller and threaded through every [`name`] call, so a run's
/// naming can be replayed in isolation.
#[derive(Debug, Default, Clone)]
pub struct NamingContext {
    seen: BTreeMap<(String, String), u32>,
    issued: BTreeSet<String>,
}

impl NamingContext {
    /// Fresh context with nothing issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many members have inferred this exact name and version so far.
    #[must_use]
    pub fn count(&self, name: &str, version: &str) -> u32 {
        self.seen
            .get(&(name.to_owned(), version.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Issue an identifier for a parsed name and record it.
    pub fn assign(&mut self, parsed: &ParsedName) -> PackagingIdentifier {
        let (version, mandatory) = match parsed.version() {
            Some(version) => (version.to_owned(), false),
            None => (UNKNOWN_VERSION.to_owned(), true),
        };
        let name = parsed.name().to_owned();

        let count = self
            .seen
            .entry((name.clone(), version.clone()))
            .or_insert(0);
        *count += 1;
        let mut n = *count;

        loop {
            let disambiguator = (mandatory || n > 1).then_some(n);
            let id = PackagingIdentifier {
                name: name.clone(),
                version: version.clone(),
                disambiguator,
            };
            if self.issued.insert(id.to_string()) {
                return id;
            }
            n += 1;
        }
    }
}

/// Derive a unique [`PackagingIdentifier`] for `member`, recording it in
/// `context`.
pub fn name(member: &ClosureMember, context: &mut NamingContext) -> PackagingIdentifier {
    let id = context.assign(member.parsed_name());
    log::debug!("{} -> {id}", member.store_path());
    id
}

//! Negotiation message types and their text encoding.

use std::fmt::{self, Write as _};

use crate::{CTCP_DELIM, DCC_PREFIX};

/// File offer: the peer can collect `filename` from `host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// Advertised file name
    pub filename: String,
    /// Host the peer connects to
    pub host: String,
    /// Port the peer connects to (never 0)
    pub port: u16,
    /// File size in bytes, when advertised
    pub size: Option<u64>,
}

/// Request to resume a transfer at `position`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume {
    /// File being resumed
    pub filename: String,
    /// Port of the transfer being resumed
    pub port: u16,
    /// Byte offset to resume from
    pub position: u64,
}

/// Acknowledgement of a [`Resume`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accept {
    /// File being resumed
    pub filename: String,
    /// Port of the transfer being resumed
    pub port: u16,
    /// Byte offset the transfer resumes from
    pub position: u64,
}

impl Resume {
    /// The matching acknowledgement
    pub fn accept(&self) -> Accept {
        Accept {
            filename: self.filename.clone(),
            port: self.port,
            position: self.position,
        }
    }
}

/// A negotiation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// `SSEND filename host port [size]`
    Offer(Offer),
    /// `RESUME filename port position`
    Resume(Resume),
    /// `ACCEPT filename port position`
    Accept(Accept),
}

impl Negotiation {
    /// Verb as it appears on the wire
    pub fn verb(&self) -> &'static str {
        match self {
            Negotiation::Offer(_) => "SSEND",
            Negotiation::Resume(_) => "RESUME",
            Negotiation::Accept(_) => "ACCEPT",
        }
    }

    /// Filename carried by the message
    pub fn filename(&self) -> &str {
        match self {
            Negotiation::Offer(m) => &m.filename,
            Negotiation::Resume(m) => &m.filename,
            Negotiation::Accept(m) => &m.filename,
        }
    }

    /// Wrapped form: `\x01DCC ...\x01`
    pub fn to_ctcp(&self) -> String {
        format!("{CTCP_DELIM}{self}{CTCP_DELIM}")
    }
}

impl From<Offer> for Negotiation {
    fn from(m: Offer) -> Self {
        Negotiation::Offer(m)
    }
}

impl From<Resume> for Negotiation {
    fn from(m: Resume) -> Self {
        Negotiation::Resume(m)
    }
}

impl From<Accept> for Negotiation {
    fn from(m: Accept) -> Self {
        Negotiation::Accept(m)
    }
}

/// Plain form: `DCC <VERB> <args>`. Filenames that are empty or contain a
/// space or `"` are double-quoted, with `"` and `\` escaped by a backslash.
impl fmt::Display for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DCC_PREFIX} {} {}", self.verb(), Quoted(self.filename()))?;
        match self {
            Negotiation::Offer(m) => {
                write!(f, " {} {}", m.host, m.port)?;
                if let Some(size) = m.size {
                    write!(f, " {size}")?;
                }
                Ok(())
            }
            Negotiation::Resume(m) => write!(f, " {} {}", m.port, m.position),
            Negotiation::Accept(m) => write!(f, " {} {}", m.port, m.position),
        }
    }
}

struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0;
        if !name.is_empty() && !name.contains([' ', '"']) {
            return f.write_str(name);
        }
        f.write_char('"')?;
        for c in name.chars() {
            if matches!(c, '"' | '\\') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        f.write_char('"')
    }
}

use crate::error::Error;
use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.pad("info"),
            Severity::Warning => f.pad("warning"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BinaryLocation {
    pub(crate) name: String,
    pub(crate) pc: u64,
}

#[derive(Clone, Debug)]
pub enum Location {
    BinaryLocation(BinaryLocation),
    Loop(String, usize),
    Listing,
}

#[derive(Debug)]
pub struct Remark {
    pub(crate) loc: Location,
    pub(crate) severity: Severity,
    pub(crate) err: Error,
    pub(crate) desc: Option<String>,
}

#[derive(Debug, Default)]
pub struct DiagnosticContext {
    remarks: RefCell<Vec<Remark>>,
}

impl<'a> Remark {
    pub fn function(name: &'a str, pc: u64, err: Error) -> Remark {
        Self {
            loc: Location::BinaryLocation(BinaryLocation {
                name: name.to_string(),
                pc,
            }),
            severity: Severity::Warning,
            err,
            desc: None,
        }
    }

    pub fn loop_(name: &'a str, loop_id: usize, err: Error) -> Remark {
        Self {
            loc: Location::Loop(name.to_string(), loop_id),
            severity: Severity::Info,
            err,
            desc: None,
        }
    }

    pub fn listing(err: Error, desc: Option<String>) -> Remark {
        Remark {
            loc: Location::Listing,
            severity: Severity::Warning,
            err,
            desc,
        }
    }

    pub fn error(&self) -> &Error {
        &self.err
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::BinaryLocation(b) => write!(f, "{}:{:#x}", b.name, b.pc),
            Location::Loop(name, id) => write!(f, "{}:loop{}", name, id),
            Location::Listing => f.pad("<listing>"),
        }
    }
}

impl Display for Remark {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: [{}] ", self.loc, self.severity)?;
        Display::fmt(&self.err, f)?;
        if let Some(x) = &self.desc {
            write!(f, " {}", x)?;
        }
        Ok(())
    }
}

impl DiagnosticContext {
    pub fn record(&self, remark: Remark) {
        self.remarks.borrow_mut().push(remark);
    }

    pub fn remarks(&self) -> Vec<Remark> {
        self.remarks.take()
    }

    pub fn len(&self) -> usize {
        self.remarks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

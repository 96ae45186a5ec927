//! Table driven specs.
//!
//! A table is one body plus a list of entries. Every [`Entry`] carries an
//! [`Args`] list which is checked against the [`TableBody`]'s declared
//! parameter kinds when the tree is built. A mismatch does not abort the
//! build; the generated `It` fails with the [`ParameterMismatchError`] when
//! it runs.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    context::SpecContext,
    error::ParameterMismatchError,
    node::{Body, BodyShape, CodeLocation, Decorations, NodeResult, erase_call},
};

/// One positional table argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Duration(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Duration,
    /// Accepts any argument.
    Any,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::Bool => "bool",
            ArgKind::Int => "int",
            ArgKind::UInt => "uint",
            ArgKind::Float => "float",
            ArgKind::Str => "string",
            ArgKind::Bytes => "bytes",
            ArgKind::Duration => "duration",
            ArgKind::Any => "any",
        })
    }
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Bool(_) => ArgKind::Bool,
            Arg::Int(_) => ArgKind::Int,
            Arg::UInt(_) => ArgKind::UInt,
            Arg::Float(_) => ArgKind::Float,
            Arg::Str(_) => ArgKind::Str,
            Arg::Bytes(_) => ArgKind::Bytes,
            Arg::Duration(_) => ArgKind::Duration,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            Arg::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Arg::UInt(v) => Some(*v),
            Arg::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Arg::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Arg::Duration(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Bool(v) => write!(f, "{v}"),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::UInt(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Str(v) => write!(f, "{v}"),
            Arg::Bytes(v) => write!(f, "{v:?}"),
            Arg::Duration(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! impl_from_arg {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::$variant(value $(as $cast)?)
                }
            }
        )*
    };
}

impl_from_arg! {
    bool => Bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt,
    usize => UInt as u64,
    f32 => Float as f64,
    f64 => Float,
    String => Str,
    Vec<u8> => Bytes,
    Duration => Duration,
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

/// The positional arguments of one table entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Args {
    type Output = Arg;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

impl FromIterator<Arg> for Args {
    fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Build an [`Args`] list from values convertible into [`Arg`].
#[macro_export]
macro_rules! args {
    () => {
        $crate::table::Args::default()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::table::Args::new(vec![$($crate::table::Arg::from($value)),+])
    };
}

type TableFn = dyn Fn(&SpecContext, &Args) -> NodeResult + Send + Sync;
type DescribeFn = dyn Fn(&Args) -> String + Send + Sync;

/// The shared body of a table with its declared parameter kinds.
#[derive(Clone)]
pub struct TableBody {
    params: Vec<ArgKind>,
    shape: BodyShape,
    call: Arc<TableFn>,
    describe: Option<Arc<DescribeFn>>,
}

impl fmt::Debug for TableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBody")
            .field("params", &self.params)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl TableBody {
    pub fn new<F, T>(params: impl Into<Vec<ArgKind>>, f: F) -> Self
    where
        F: Fn(&Args) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            params: params.into(),
            shape: BodyShape::Plain,
            call: Arc::new(move |_, args| f(args).into()),
            describe: None,
        }
    }

    pub fn with_context<F, T>(params: impl Into<Vec<ArgKind>>, f: F) -> Self
    where
        F: Fn(&SpecContext, &Args) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            params: params.into(),
            shape: BodyShape::Context,
            call: Arc::new(move |ctx, args| f(ctx, args).into()),
            describe: None,
        }
    }

    /// Derive entry descriptions from their arguments.
    pub fn with_description<F>(self, f: F) -> Self
    where
        F: Fn(&Args) -> String + Send + Sync + 'static,
    {
        Self {
            describe: Some(Arc::new(f)),
            ..self
        }
    }

    pub fn params(&self) -> &[ArgKind] {
        &self.params
    }

    pub fn check(&self, args: &Args, location: &CodeLocation) -> Result<(), ParameterMismatchError> {
        if args.len() != self.params.len() {
            return Err(ParameterMismatchError::Arity {
                expected: self.params.len(),
                got: args.len(),
                location: location.clone(),
            });
        }

        let mismatch = self
            .params
            .iter()
            .zip(args.iter())
            .enumerate()
            .find(|(_, (expected, arg))| **expected != ArgKind::Any && **expected != arg.kind());
        match mismatch {
            Some((index, (expected, arg))) => Err(ParameterMismatchError::Type {
                index,
                expected: *expected,
                got: arg.kind(),
                location: location.clone(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn describe(&self, entry: &Entry) -> String {
        match (&entry.description, &self.describe) {
            (Some(text), _) => text.clone(),
            (None, Some(describe)) => describe(&entry.args),
            (None, None) => format!("Entry: {}", entry.args),
        }
    }

    /// Bind the entry's arguments, or turn a mismatch into a body that fails.
    pub(crate) fn bind(&self, entry: &Entry) -> Body {
        if let Err(err) = self.check(&entry.args, &entry.location) {
            let message = err.to_string();
            let location = entry.location.clone();
            return Body::from_parts(
                self.shape,
                erase_call(move |_| NodeResult {
                    location: Some(location.clone()),
                    ..NodeResult::from(crate::node::NodeOutcome::Failed(message.clone()))
                }),
            );
        }

        let call = Arc::clone(&self.call);
        let args = entry.args.clone();
        Body::from_parts(self.shape, erase_call(move |node_call| call(node_call.ctx, &args)))
    }
}

/// One row of a table.
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) description: Option<String>,
    pub(crate) args: Args,
    pub(crate) decorations: Decorations,
    pub(crate) location: CodeLocation,
}

impl Entry {
    #[track_caller]
    pub fn new(args: Args) -> Self {
        Self {
            description: None,
            args,
            decorations: Decorations::default(),
            location: CodeLocation::caller(),
        }
    }

    #[track_caller]
    pub fn described(text: impl Into<String>, args: Args) -> Self {
        Self {
            description: Some(text.into()),
            ..Self::new(args)
        }
    }

    pub fn with_decorations(self, decorations: Decorations) -> Self {
        Self {
            decorations,
            ..self
        }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }
}

//! Built-in `#name(...)` calls.

use std::ops::RangeInclusive;

use chrono::Utc;
use tracing::{debug, warn};

use crate::context::ContextGuard;
use crate::record::Record;
use crate::settings::KnowledgeUpdateSettings;

use super::CompiledExpression;

/// A built-in system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemCall {
    /// `#to_double(v)`
    ToDouble,
    /// `#to_integer(v)`
    ToInteger,
    /// `#to_string(v[, delimiter])`
    ToString,
    /// `#to_doubles(v)`
    ToDoubles,
    /// `#to_integers(v)`
    ToIntegers,
    /// `#size(v)`
    Size,
    /// `#type(v)`
    Type,
    /// `#isinf(v)`
    Isinf,
    /// `#fragment(v, first, last)`
    Fragment,
    /// `#expand(text)`
    Expand,
    /// `#print(text)`
    Print,
    /// `#eval(text)`
    Eval,
    /// `#delete_variable(name)`
    DeleteVariable,
    /// `#clear_variable(name)`
    ClearVariable,
    /// `#get_clock([name])`
    GetClock,
    /// `#set_clock([name, ]clock)`
    SetClock,
    /// `#get_time()`, nanoseconds since the epoch.
    GetTime,
    /// `#get_time_seconds()`
    GetTimeSeconds,
}

impl SystemCall {
    const ALL: [Self; 18] = [
        Self::ToDouble,
        Self::ToInteger,
        Self::ToString,
        Self::ToDoubles,
        Self::ToIntegers,
        Self::Size,
        Self::Type,
        Self::Isinf,
        Self::Fragment,
        Self::Expand,
        Self::Print,
        Self::Eval,
        Self::DeleteVariable,
        Self::ClearVariable,
        Self::GetClock,
        Self::SetClock,
        Self::GetTime,
        Self::GetTimeSeconds,
    ];

    /// Looks up a call by the name used after `#`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|call| call.name() == name)
    }

    /// Name as written after `#`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ToDouble => "to_double",
            Self::ToInteger => "to_integer",
            Self::ToString => "to_string",
            Self::ToDoubles => "to_doubles",
            Self::ToIntegers => "to_integers",
            Self::Size => "size",
            Self::Type => "type",
            Self::Isinf => "isinf",
            Self::Fragment => "fragment",
            Self::Expand => "expand",
            Self::Print => "print",
            Self::Eval => "eval",
            Self::DeleteVariable => "delete_variable",
            Self::ClearVariable => "clear_variable",
            Self::GetClock => "get_clock",
            Self::SetClock => "set_clock",
            Self::GetTime => "get_time",
            Self::GetTimeSeconds => "get_time_seconds",
        }
    }

    /// Accepted argument counts.
    #[must_use]
    pub const fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::ToString => 1..=2,
            Self::Fragment => 3..=3,
            Self::GetClock => 0..=1,
            Self::SetClock => 1..=2,
            Self::GetTime | Self::GetTimeSeconds => 0..=0,
            _ => 1..=1,
        }
    }

    /// Pure calls depend only on their arguments and may be folded by prune.
    #[must_use]
    pub const fn is_pure(self) -> bool {
        matches!(
            self,
            Self::ToDouble
                | Self::ToInteger
                | Self::ToString
                | Self::ToDoubles
                | Self::ToIntegers
                | Self::Size
                | Self::Type
                | Self::Isinf
                | Self::Fragment
        )
    }

    pub(crate) fn evaluate(
        self,
        args: &[Record],
        ctx: &mut ContextGuard<'_>,
        settings: &KnowledgeUpdateSettings,
    ) -> Record {
        if !self.arity().contains(&args.len()) {
            warn!(call = self.name(), args = args.len(), "wrong number of arguments");
            return Record::default();
        }
        match (self, args) {
            (Self::ToDouble, [v]) => Record::double(v.to_double()),
            (Self::ToInteger, [v]) => Record::integer(v.to_integer()),
            (Self::ToString, [v]) => Record::string(v.to_string()),
            (Self::ToString, [v, delimiter]) => Record::string(v.to_string_with(&delimiter.to_string())),
            (Self::ToDoubles, [v]) => Record::from(v.to_doubles()),
            (Self::ToIntegers, [v]) => Record::from(v.to_integers()),
            #[allow(clippy::cast_possible_wrap)]
            (Self::Size, [v]) => Record::integer(v.size() as i64),
            (Self::Type, [v]) => Record::string(v.type_name()),
            (Self::Isinf, [v]) => Record::from_bool(v.to_double().is_infinite()),
            (Self::Fragment, [v, first, last]) => v.fragment(as_index(first), as_index(last)),
            (Self::Expand, [v]) => Record::string(ctx.expand_statement(&v.to_string())),
            (Self::Print, [v]) => Record::string(ctx.print(&v.to_string())),
            (Self::Eval, [v]) => eval(&v.to_string(), ctx, settings),
            (Self::DeleteVariable, [name]) => Record::from_bool(ctx.delete_variable(&name.to_string())),
            (Self::ClearVariable, [name]) => Record::from_bool(ctx.clear_variable(&name.to_string())),
            (Self::GetClock, []) => clock_record(ctx.clock()),
            (Self::GetClock, [name]) => clock_record(ctx.variable_clock(&name.to_string())),
            (Self::SetClock, [clock]) => {
                let clock = clock_value(clock);
                ctx.set_clock(clock);
                clock_record(clock)
            }
            (Self::SetClock, [name, clock]) => {
                let clock = clock_value(clock);
                if ctx.set_variable_clock(&name.to_string(), clock) {
                    clock_record(clock)
                } else {
                    Record::default()
                }
            }
            (Self::GetTime, []) => Record::integer(Utc::now().timestamp_nanos_opt().unwrap_or(0)),
            (Self::GetTimeSeconds, []) => Record::integer(Utc::now().timestamp()),
            _ => Record::default(),
        }
    }
}

fn as_index(record: &Record) -> usize {
    usize::try_from(record.to_integer()).unwrap_or(0)
}

fn clock_value(record: &Record) -> u64 {
    u64::try_from(record.to_integer()).unwrap_or(0)
}

fn clock_record(clock: u64) -> Record {
    Record::integer(i64::try_from(clock).unwrap_or(i64::MAX))
}

/// Compiles and runs KaRL text held in a variable. Nesting counts against the
/// context's call depth limit.
fn eval(text: &str, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
    let compiled = match CompiledExpression::compile(text, ctx) {
        Ok(compiled) => compiled,
        Err(err) => {
            debug!(expression = %text, error = %err, "#eval failed to compile");
            return Record::default();
        }
    };
    if !ctx.enter_call() {
        warn!(expression = %text, "#eval nested too deeply");
        return Record::default();
    }
    let result = compiled.evaluate(ctx, settings).unwrap_or_default();
    ctx.exit_call();
    result
}

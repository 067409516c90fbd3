use std::any::Any;
use std::fmt;

use crate::context::{ReadContext, ReadMode};
use crate::error::{Error, ErrorKind, Result};

/// Whether a column feeds an ordinary member or a constructor parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Target {
    Member,
    ConstructorParameter(usize),
}

/// A read-side column descriptor: a name, a parser, a setter and the
/// optional trimmings around them.
///
/// The parser turns a value's text into a typed value; the setter applies
/// that value to a row of type `T`. The value travels between them as a
/// `Box<dyn Any>`, which is what lets columns with different value types
/// live in one binding, and what lets values be held in slots before the
/// row exists.
pub struct Column<T> {
    name: String,
    required: bool,
    target: Target,
    parser: Box<dyn Fn(&str, &ReadContext) -> Option<Box<dyn Any>>>,
    setter: Option<Box<dyn FnMut(&mut T, Box<dyn Any>, &ReadContext) -> Result<()>>>,
    reset: Option<Box<dyn FnMut(&mut T, &ReadContext) -> Result<()>>>,
}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("target", &self.target)
            .finish()
    }
}

impl<T> Column<T> {
    /// Bind a column to an ordinary member of `T`.
    ///
    /// A parser returning `None` rejects the value; a setter returning an
    /// error fails the record with a conversion error.
    ///
    /// ```
    /// use cesil::Column;
    ///
    /// #[derive(Default)]
    /// struct Person { age: u32 }
    ///
    /// let col = Column::<Person>::new(
    ///     "age",
    ///     |text, _| text.parse().ok(),
    ///     |person, age, _| {
    ///         person.age = age;
    ///         Ok(())
    ///     },
    /// );
    /// assert_eq!("age", col.name());
    /// ```
    pub fn new<V, P, S>(name: &str, parser: P, setter: S) -> Column<T>
    where
        V: 'static,
        P: Fn(&str, &ReadContext) -> Option<V> + 'static,
        S: FnMut(&mut T, V, &ReadContext) -> Result<()> + 'static,
    {
        let mut setter = setter;
        Column {
            name: name.to_string(),
            required: false,
            target: Target::Member,
            parser: Box::new(move |text, ctx| {
                parser(text, ctx).map(|v| Box::new(v) as Box<dyn Any>)
            }),
            setter: Some(Box::new(move |row, any, ctx| {
                // The parser above is the only producer of this box, so
                // the downcast cannot fail.
                let v = any.downcast::<V>().expect("column value type");
                setter(row, *v, ctx)
            })),
            reset: None,
        }
    }

    /// Bind a column to constructor parameter `slot` of a
    /// [`RowBinding::with_constructor`] binding. Constructor parameters
    /// are implicitly required: without them the row cannot be built.
    pub fn constructor_parameter<V, P>(
        name: &str,
        parser: P,
        slot: usize,
    ) -> Column<T>
    where
        V: 'static,
        P: Fn(&str, &ReadContext) -> Option<V> + 'static,
    {
        Column {
            name: name.to_string(),
            required: true,
            target: Target::ConstructorParameter(slot),
            parser: Box::new(move |text, ctx| {
                parser(text, ctx).map(|v| Box::new(v) as Box<dyn Any>)
            }),
            setter: None,
            reset: None,
        }
    }

    /// Mark this column as required: a record in which it received no
    /// value is rejected.
    pub fn required(mut self) -> Column<T> {
        self.required = true;
        self
    }

    /// Run `f` on the row just before this column's setter, each time the
    /// column receives a value. An error fails the record the same way a
    /// failing setter does.
    pub fn reset<F>(mut self, f: F) -> Column<T>
    where
        F: FnMut(&mut T, &ReadContext) -> Result<()> + 'static,
    {
        self.reset = Some(Box::new(f));
        self
    }

    /// The column's name, used for header matching.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the column is required.
    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// Staging slots for values parsed before their row can be constructed.
///
/// A `Hold` has one slot per constructor parameter. The constructor
/// closure takes its arguments out with [`Hold::take`].
#[derive(Debug, Default)]
pub struct Hold {
    slots: Vec<Option<Box<dyn Any>>>,
}

impl Hold {
    fn new(slots: usize) -> Hold {
        let mut hold = Hold { slots: Vec::with_capacity(slots) };
        hold.slots.resize_with(slots, || None);
        hold
    }

    fn put(&mut self, slot: usize, value: Box<dyn Any>) {
        self.slots[slot] = Some(value);
    }

    fn is_filled(&self, slot: usize) -> bool {
        self.slots.get(slot).map_or(false, Option::is_some)
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Take the value held in `slot`.
    ///
    /// Returns `None` when the slot is empty or holds a different type.
    /// For slots bound to constructor parameters the binding guarantees a
    /// value is present by the time the constructor runs.
    pub fn take<V: 'static>(&mut self, slot: usize) -> Option<V> {
        let any = self.slots.get_mut(slot)?.take()?;
        match any.downcast::<V>() {
            Ok(v) => Some(*v),
            Err(any) => {
                self.slots[slot] = Some(any);
                None
            }
        }
    }
}

enum Provider<T> {
    /// The row exists before any value is applied.
    Instance(Box<dyn FnMut() -> T>),
    /// The row is built from held constructor parameters at record end.
    Constructor {
        slots: usize,
        build: Box<dyn FnMut(&mut Hold, &ReadContext) -> Result<T>>,
    },
}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Provider::Instance(_) => write!(f, "Provider::Instance"),
            Provider::Constructor { slots, .. } => {
                write!(f, "Provider::Constructor({} slots)", slots)
            }
        }
    }
}

/// The columns and instance provider that turn records into rows of type
/// `T`.
pub struct RowBinding<T> {
    columns: Vec<Column<T>>,
    provider: Provider<T>,
}

impl<T> fmt::Debug for RowBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RowBinding")
            .field("columns", &self.columns)
            .field("provider", &self.provider)
            .finish()
    }
}

impl<T> RowBinding<T> {
    /// Bind columns to rows produced by `provider` (a no-argument
    /// constructor, factory function or closure).
    pub fn new<F>(provider: F, columns: Vec<Column<T>>) -> Result<RowBinding<T>>
    where
        F: FnMut() -> T + 'static,
    {
        for col in &columns {
            if let Target::ConstructorParameter(_) = col.target {
                return Err(config(format!(
                    "column {:?} is bound to a constructor parameter but \
                     the binding has no constructor",
                    col.name
                )));
            }
        }
        validate_names(&columns)?;
        Ok(RowBinding { columns, provider: Provider::Instance(Box::new(provider)) })
    }

    /// Bind columns to rows built by a constructor with `slots`
    /// parameters.
    ///
    /// Columns created with [`Column::constructor_parameter`] parse into
    /// the numbered [`Hold`] slots; `build` is invoked once per record,
    /// after all values have been parsed. Ordinary member columns may be
    /// mixed in: their values are staged too and applied to the freshly
    /// built row in column order.
    pub fn with_constructor<F>(
        slots: usize,
        build: F,
        columns: Vec<Column<T>>,
    ) -> Result<RowBinding<T>>
    where
        F: FnMut(&mut Hold, &ReadContext) -> Result<T> + 'static,
    {
        for col in &columns {
            if let Target::ConstructorParameter(slot) = col.target {
                if slot >= slots {
                    return Err(config(format!(
                        "column {:?} is bound to constructor parameter {} \
                         but the constructor has {} parameters",
                        col.name, slot, slots
                    )));
                }
            }
        }
        validate_names(&columns)?;
        Ok(RowBinding {
            columns,
            provider: Provider::Constructor { slots, build: Box::new(build) },
        })
    }

    /// The bound column names, in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub(crate) fn columns(&self) -> &[Column<T>] {
        &self.columns
    }
}

fn validate_names<T>(columns: &[Column<T>]) -> Result<()> {
    for (i, a) in columns.iter().enumerate() {
        for b in &columns[..i] {
            if a.name == b.name {
                return Err(config(format!(
                    "column name {:?} is bound twice",
                    a.name
                )));
            }
        }
    }
    Ok(())
}

fn config(msg: String) -> Error {
    Error::from(ErrorKind::Config(msg))
}

/// Wrap a setter or reset failure with the record and column it hit. An
/// error that is already a conversion error passes through unchanged.
fn convert_error(row: u64, column: &str, err: Error) -> Error {
    match err.into_kind() {
        kind @ ErrorKind::Convert { .. } => Error::from(kind),
        kind => Error::from(ErrorKind::Convert {
            row,
            column: column.to_string(),
            message: kind.to_string(),
        }),
    }
}

/// Drives a [`RowBinding`] over one record at a time.
///
/// Values arrive through [`Assembler::value`] in source order;
/// [`Assembler::finish`] closes the record, enforces required columns and
/// produces the row.
pub(crate) struct Assembler<T> {
    binding: RowBinding<T>,
    /// The row under construction, for instance-provider bindings.
    row: Option<T>,
    hold: Hold,
    /// Staged `(column index, value)` pairs for member columns of
    /// constructor bindings, in arrival order.
    staged: Vec<(usize, Box<dyn Any>)>,
    received: Vec<bool>,
    row_number: u64,
}

impl<T> Assembler<T> {
    pub(crate) fn new(binding: RowBinding<T>) -> Assembler<T> {
        let ncols = binding.columns.len();
        let slots = match binding.provider {
            Provider::Instance(_) => 0,
            Provider::Constructor { slots, .. } => slots,
        };
        Assembler {
            binding,
            row: None,
            hold: Hold::new(slots),
            staged: vec![],
            received: vec![false; ncols],
            row_number: 0,
        }
    }

    pub(crate) fn binding(&self) -> &RowBinding<T> {
        &self.binding
    }

    pub(crate) fn row_number(&self) -> u64 {
        self.row_number
    }

    /// Apply one column's text. `index` indexes the binding's columns.
    pub(crate) fn value(&mut self, index: usize, text: &str) -> Result<()> {
        let row_number = self.row_number;
        let col = &mut self.binding.columns[index];
        let ctx = ReadContext::new(
            ReadMode::ConvertingColumn,
            row_number,
            Some((index, &col.name)),
        );
        let parsed = (col.parser)(text, &ctx).ok_or_else(|| {
            Error::from(ErrorKind::Parse {
                row: row_number,
                column: col.name.clone(),
                input: text.to_string(),
            })
        })?;
        match self.binding.provider {
            Provider::Instance(ref mut provider) => {
                let row = self.row.get_or_insert_with(|| provider());
                if let Some(reset) = col.reset.as_mut() {
                    reset(row, &ctx).map_err(|err| {
                        convert_error(row_number, &col.name, err)
                    })?;
                }
                let setter =
                    col.setter.as_mut().expect("member columns have setters");
                setter(row, parsed, &ctx).map_err(|err| {
                    convert_error(row_number, &col.name, err)
                })?;
            }
            Provider::Constructor { .. } => match col.target {
                Target::ConstructorParameter(slot) => {
                    self.hold.put(slot, parsed);
                }
                Target::Member => {
                    self.staged.push((index, parsed));
                }
            },
        }
        self.received[index] = true;
        Ok(())
    }

    /// Close the record and produce the row.
    pub(crate) fn finish(&mut self) -> Result<T> {
        self.check_required()?;
        let ctx =
            ReadContext::new(ReadMode::ConvertingRow, self.row_number, None);
        let row = match self.binding.provider {
            Provider::Instance(ref mut provider) => {
                // A record whose columns all went unmatched still yields a
                // (default) row.
                self.row.take().unwrap_or_else(|| provider())
            }
            Provider::Constructor { ref mut build, .. } => {
                let row_number = self.row_number;
                let mut row = build(&mut self.hold, &ctx)?;
                for (index, value) in self.staged.drain(..) {
                    let col = &mut self.binding.columns[index];
                    let ctx = ReadContext::new(
                        ReadMode::ConvertingRow,
                        row_number,
                        Some((index, &col.name)),
                    );
                    if let Some(reset) = col.reset.as_mut() {
                        reset(&mut row, &ctx).map_err(|err| {
                            convert_error(row_number, &col.name, err)
                        })?;
                    }
                    let setter = col
                        .setter
                        .as_mut()
                        .expect("member columns have setters");
                    setter(&mut row, value, &ctx).map_err(|err| {
                        convert_error(row_number, &col.name, err)
                    })?;
                }
                row
            }
        };
        self.reset_record();
        self.row_number += 1;
        Ok(row)
    }

    /// Like [`Assembler::finish`], but applies the record to an existing
    /// row instead of producing a new one.
    pub(crate) fn finish_into(&mut self, row: &mut T) -> Result<()> {
        match self.binding.provider {
            Provider::Instance(_) => {
                self.check_required()?;
                // Values were applied to a fresh row; move it over.
                if let Some(built) = self.row.take() {
                    *row = built;
                } else {
                    // No column matched; leave a fresh default row.
                    if let Provider::Instance(ref mut provider) =
                        self.binding.provider
                    {
                        *row = provider();
                    }
                }
                self.reset_record();
                self.row_number += 1;
                Ok(())
            }
            Provider::Constructor { .. } => {
                *row = self.finish()?;
                Ok(())
            }
        }
    }

    /// Discard any partially assembled record, for error recovery.
    pub(crate) fn abandon(&mut self) {
        self.reset_record();
    }

    fn reset_record(&mut self) {
        self.row = None;
        self.hold.clear();
        self.staged.clear();
        for r in &mut self.received {
            *r = false;
        }
    }

    fn check_required(&self) -> Result<()> {
        for (i, col) in self.binding.columns.iter().enumerate() {
            let missing = !self.received[i]
                && match col.target {
                    Target::Member => col.required,
                    Target::ConstructorParameter(slot) => {
                        !self.hold.is_filled(slot)
                    }
                };
            if missing {
                return Err(Error::from(ErrorKind::RequiredColumnMissing {
                    column: col.name.clone(),
                    row: self.row_number,
                }));
            }
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Assembler<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Assembler")
            .field("binding", &self.binding)
            .field("row_number", &self.row_number)
            .finish()
    }
}

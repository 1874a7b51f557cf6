//! Record model: closed vocabularies, entry shapes and the page envelope.
//!
//! A directory page is always `{pgnum, yr, entries: [...]}`; what varies is
//! the entry. An entry is an *identifier part* (state heading, project
//! number, or both) plus a *field set* (core or extended). Both halves
//! describe their columns through [`FieldSpec`] tables, so the response
//! schema sent to the model, the flattened CSV columns and the JSON decoder
//! all come from the same declaration.
//!
//! ```text
//!               identifier        field set
//! private       state_heading     core
//! gov           project_num       core
//! combined      both              core
//! private-ext   state_heading     extended
//! gov-ext       project_num       extended
//! ```

use crate::error::DigitizeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

// ── Vocabularies ─────────────────────────────────────────────────────────

/// Declares a closed vocabulary whose wire text is the upper-case label.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire text of every value, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DigitizeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        DigitizeError::InvalidConfig(format!(
                            "'{}' is not a valid {}; expected one of {}",
                            s,
                            stringify!($name),
                            Self::NAMES.join(", ")
                        ))
                    })
            }
        }
    };
}

vocabulary! {
    /// Commodity carried by the line.
    FuelType {
        NaturalGas => "NATURAL GAS",
        Gas => "GAS",
        Gasoline => "GASOLINE",
        Crude => "CRUDE",
        Petroleum => "PETROLEUM",
        Oil => "OIL",
        Product => "PRODUCT",
        Other => "OTHER",
        Unknown => "UNK",
        NotApplicable => "NA",
    }
}

vocabulary! {
    /// Yes/no answer with the two sentinels.
    Flag {
        True => "TRUE",
        False => "FALSE",
        Unknown => "UNK",
        NotApplicable => "NA",
    }
}

vocabulary! {
    /// Whether the line crosses a state border.
    Jurisdiction {
        Interstate => "INTERSTATE",
        Intrastate => "INTRASTATE",
        Unknown => "UNK",
        NotApplicable => "NA",
    }
}

vocabulary! {
    /// Role of the line in the network.
    PipelineFunction {
        Transmission => "TRANSMISSION",
        Distribution => "DISTRIBUTION",
        Gathering => "GATHERING",
        Fielding => "FIELDING",
        Other => "OTHER",
        Unknown => "UNK",
        NotApplicable => "NA",
    }
}

// ── Field declarations ───────────────────────────────────────────────────

/// Value type of a single field, as the response schema describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Integer,
    /// One of a closed set of labels.
    Choice(&'static [&'static str]),
}

/// One field of an entry: its JSON key and its flattened column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

const fn spec(key: &'static str, column: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { key, column, kind }
}

/// Half of an entry that knows its fields and can render them as cells.
pub trait EntryPart: Serialize + DeserializeOwned {
    /// Field declarations, in column order.
    const FIELDS: &'static [FieldSpec];

    /// Cell text for each field in [`Self::FIELDS`], same order.
    fn cells(&self) -> Vec<String>;
}

fn length_cell(v: f64) -> String {
    format!("{v}")
}

// ── Identifier parts ─────────────────────────────────────────────────────

/// Private filings are listed under a state heading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHeading {
    pub state_heading: String,
}

impl EntryPart for StateHeading {
    const FIELDS: &'static [FieldSpec] = &[spec("state_heading", "State Heading", FieldKind::Text)];

    fn cells(&self) -> Vec<String> {
        vec![self.state_heading.clone()]
    }
}

/// Government filings carry a project number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNumber {
    pub project_num: i64,
}

impl EntryPart for ProjectNumber {
    const FIELDS: &'static [FieldSpec] =
        &[spec("project_num", "Project Number", FieldKind::Integer)];

    fn cells(&self) -> Vec<String> {
        vec![self.project_num.to_string()]
    }
}

/// Both identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedId {
    pub state_heading: String,
    pub project_num: i64,
}

impl EntryPart for CombinedId {
    const FIELDS: &'static [FieldSpec] = &[
        spec("state_heading", "State Heading", FieldKind::Text),
        spec("project_num", "Project Number", FieldKind::Integer),
    ];

    fn cells(&self) -> Vec<String> {
        vec![self.state_heading.clone(), self.project_num.to_string()]
    }
}

// ── Field sets ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreFields {
    pub company: String,
    pub fuel: FuelType,
    pub new_construction: Flag,
    pub construction_complete: Flag,
    /// Miles; `-1` unknown, `-2` not applicable.
    pub length: f64,
    pub origin_state: String,
    pub terminus_state: String,
    pub inter_or_intra: Jurisdiction,
}

impl EntryPart for CoreFields {
    const FIELDS: &'static [FieldSpec] = &[
        spec("company", "Pipeline Company", FieldKind::Text),
        spec("fuel", "Fuel Type", FieldKind::Choice(FuelType::NAMES)),
        spec("new_construction", "New Construction", FieldKind::Choice(Flag::NAMES)),
        spec("construction_complete", "Construction Complete", FieldKind::Choice(Flag::NAMES)),
        spec("length", "Pipeline Length", FieldKind::Number),
        spec("origin_state", "Origin State", FieldKind::Text),
        spec("terminus_state", "Terminus State", FieldKind::Text),
        spec("inter_or_intra", "Interstate or Intrastate", FieldKind::Choice(Jurisdiction::NAMES)),
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.company.clone(),
            self.fuel.to_string(),
            self.new_construction.to_string(),
            self.construction_complete.to_string(),
            length_cell(self.length),
            self.origin_state.clone(),
            self.terminus_state.clone(),
            self.inter_or_intra.to_string(),
        ]
    }
}

/// Core fields plus location detail, diameter breakdown and line attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedFields {
    pub company: String,
    pub construction_complete: Flag,
    pub new_construction: Flag,
    /// Total miles; `-1` unknown, `-2` not applicable.
    pub length: f64,
    pub length_by_diameter: String,
    pub diameter: String,
    pub fuel_raw: String,
    pub fuel_inferred: FuelType,
    pub origin_city: String,
    pub origin_county: String,
    pub origin_state: String,
    pub other_origin_description: String,
    pub terminus_city: String,
    pub terminus_county: String,
    pub terminus_state: String,
    pub other_terminus_description: String,
    pub inter_or_intra: Jurisdiction,
    pub fpc: Flag,
    pub parallel_or_loop: Flag,
    pub function: PipelineFunction,
    pub connection: Flag,
}

impl EntryPart for ExtendedFields {
    const FIELDS: &'static [FieldSpec] = &[
        spec("company", "Pipeline Company", FieldKind::Text),
        spec("construction_complete", "Construction Complete", FieldKind::Choice(Flag::NAMES)),
        spec("new_construction", "New Construction", FieldKind::Choice(Flag::NAMES)),
        spec("length", "Total Pipeline Length", FieldKind::Number),
        spec("length_by_diameter", "Pipeline Length by Diameter", FieldKind::Text),
        spec("diameter", "Pipeline Diameter", FieldKind::Text),
        spec("fuel_raw", "Fuel Type Raw", FieldKind::Text),
        spec("fuel_inferred", "Fuel Type Inferred", FieldKind::Choice(FuelType::NAMES)),
        spec("origin_city", "Origin City", FieldKind::Text),
        spec("origin_county", "Origin County", FieldKind::Text),
        spec("origin_state", "Origin State", FieldKind::Text),
        spec("other_origin_description", "Other Origin Description", FieldKind::Text),
        spec("terminus_city", "Terminus City", FieldKind::Text),
        spec("terminus_county", "Terminus County", FieldKind::Text),
        spec("terminus_state", "Terminus State", FieldKind::Text),
        spec("other_terminus_description", "Other Terminus Description", FieldKind::Text),
        spec("inter_or_intra", "Interstate or Intrastate", FieldKind::Choice(Jurisdiction::NAMES)),
        spec("fpc", "FPC", FieldKind::Choice(Flag::NAMES)),
        spec("parallel_or_loop", "Parallel or Loop", FieldKind::Choice(Flag::NAMES)),
        spec("function", "Function", FieldKind::Choice(PipelineFunction::NAMES)),
        spec("connection", "Connection", FieldKind::Choice(Flag::NAMES)),
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.company.clone(),
            self.construction_complete.to_string(),
            self.new_construction.to_string(),
            length_cell(self.length),
            self.length_by_diameter.clone(),
            self.diameter.clone(),
            self.fuel_raw.clone(),
            self.fuel_inferred.to_string(),
            self.origin_city.clone(),
            self.origin_county.clone(),
            self.origin_state.clone(),
            self.other_origin_description.clone(),
            self.terminus_city.clone(),
            self.terminus_county.clone(),
            self.terminus_state.clone(),
            self.other_terminus_description.clone(),
            self.inter_or_intra.to_string(),
            self.fpc.to_string(),
            self.parallel_or_loop.to_string(),
            self.function.to_string(),
            self.connection.to_string(),
        ]
    }
}

// ── Entries and pages ────────────────────────────────────────────────────

/// One directory entry: identifier part plus field set, flat on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: EntryPart, F: EntryPart")]
pub struct Entry<I, F> {
    #[serde(flatten)]
    pub id: I,
    #[serde(flatten)]
    pub fields: F,
}

impl<I: EntryPart, F: EntryPart> Entry<I, F> {
    pub fn cells(&self) -> Vec<String> {
        let mut cells = self.id.cells();
        cells.extend(self.fields.cells());
        cells
    }
}

/// The entries of one page, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entries {
    Private(Vec<Entry<StateHeading, CoreFields>>),
    Gov(Vec<Entry<ProjectNumber, CoreFields>>),
    Combined(Vec<Entry<CombinedId, CoreFields>>),
    PrivateExtended(Vec<Entry<StateHeading, ExtendedFields>>),
    GovExtended(Vec<Entry<ProjectNumber, ExtendedFields>>),
}

impl Entries {
    pub fn len(&self) -> usize {
        match self {
            Entries::Private(v) => v.len(),
            Entries::Gov(v) => v.len(),
            Entries::Combined(v) => v.len(),
            Entries::PrivateExtended(v) => v.len(),
            Entries::GovExtended(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> PageShape {
        match self {
            Entries::Private(_) => PageShape::Private,
            Entries::Gov(_) => PageShape::Gov,
            Entries::Combined(_) => PageShape::Combined,
            Entries::PrivateExtended(_) => PageShape::PrivateExtended,
            Entries::GovExtended(_) => PageShape::GovExtended,
        }
    }
}

/// A digitized page. The year lives here so every entry shares it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Page number as printed.
    pub pgnum: i64,
    /// Data year.
    pub yr: i32,
    pub entries: Entries,
}

#[derive(Deserialize)]
#[serde(bound = "E: DeserializeOwned")]
struct RawPage<E> {
    pgnum: i64,
    yr: i32,
    entries: Vec<E>,
}

fn decode_as<I: EntryPart, F: EntryPart>(
    value: Value,
    wrap: fn(Vec<Entry<I, F>>) -> Entries,
) -> Result<Page, serde_json::Error> {
    let raw: RawPage<Entry<I, F>> = serde_json::from_value(value)?;
    Ok(Page {
        pgnum: raw.pgnum,
        yr: raw.yr,
        entries: wrap(raw.entries),
    })
}

// ── Shapes ───────────────────────────────────────────────────────────────

/// The record shape the model is asked to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageShape {
    #[default]
    Private,
    Gov,
    Combined,
    PrivateExtended,
    GovExtended,
}

impl PageShape {
    pub const ALL: &'static [PageShape] = &[
        PageShape::Private,
        PageShape::Gov,
        PageShape::Combined,
        PageShape::PrivateExtended,
        PageShape::GovExtended,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PageShape::Private => "private",
            PageShape::Gov => "gov",
            PageShape::Combined => "combined",
            PageShape::PrivateExtended => "private-extended",
            PageShape::GovExtended => "gov-extended",
        }
    }

    fn parts(&self) -> (&'static [FieldSpec], &'static [FieldSpec]) {
        match self {
            PageShape::Private => (StateHeading::FIELDS, CoreFields::FIELDS),
            PageShape::Gov => (ProjectNumber::FIELDS, CoreFields::FIELDS),
            PageShape::Combined => (CombinedId::FIELDS, CoreFields::FIELDS),
            PageShape::PrivateExtended => (StateHeading::FIELDS, ExtendedFields::FIELDS),
            PageShape::GovExtended => (ProjectNumber::FIELDS, ExtendedFields::FIELDS),
        }
    }

    /// Flattened column names, in output order.
    pub fn columns(&self) -> Vec<&'static str> {
        let (id, fields) = self.parts();
        ["Data Year", "Page Number"]
            .into_iter()
            .chain(id.iter().chain(fields).map(|f| f.column))
            .collect()
    }

    /// Response schema in the generateContent `responseSchema` dialect.
    pub fn response_schema(&self) -> Value {
        let (id, fields) = self.parts();
        let mut properties = Map::new();
        let mut required = Vec::new();
        for f in id.iter().chain(fields) {
            properties.insert(f.key.to_string(), field_schema(f));
            required.push(f.key);
        }

        json!({
            "type": "OBJECT",
            "properties": {
                "pgnum": {"type": "INTEGER", "description": "Page Number"},
                "yr": {"type": "INTEGER", "description": "Data Year"},
                "entries": {
                    "type": "ARRAY",
                    "description": "The list of entries on the page",
                    "items": {
                        "type": "OBJECT",
                        "properties": properties,
                        "required": required,
                    },
                },
            },
            "required": ["pgnum", "yr", "entries"],
        })
    }

    /// Decode model output text into a page of this shape.
    pub fn decode(&self, text: &str) -> Result<Page, serde_json::Error> {
        self.decode_value(serde_json::from_str(text)?)
    }

    pub fn decode_value(&self, value: Value) -> Result<Page, serde_json::Error> {
        match self {
            PageShape::Private => decode_as(value, Entries::Private),
            PageShape::Gov => decode_as(value, Entries::Gov),
            PageShape::Combined => decode_as(value, Entries::Combined),
            PageShape::PrivateExtended => decode_as(value, Entries::PrivateExtended),
            PageShape::GovExtended => decode_as(value, Entries::GovExtended),
        }
    }
}

fn field_schema(f: &FieldSpec) -> Value {
    match f.kind {
        FieldKind::Text => json!({"type": "STRING", "description": f.column}),
        FieldKind::Number => json!({"type": "NUMBER", "description": f.column}),
        FieldKind::Integer => json!({"type": "INTEGER", "description": f.column}),
        FieldKind::Choice(values) => {
            json!({"type": "STRING", "format": "enum", "enum": values, "description": f.column})
        }
    }
}

impl fmt::Display for PageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PageShape {
    type Err = DigitizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|shape| shape.name() == wanted)
            .ok_or_else(|| DigitizeError::UnsupportedShape {
                shape: s.to_string(),
                known: Self::ALL
                    .iter()
                    .map(|shape| shape.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

//! Raw telemetry records and column schema resolution.
//!
//! A telemetry line is a comma-separated row of frame-presentation columns.
//! Column positions come from a [`ColumnMap`], built once per input either
//! from one of the two compiled-in [`SchemaVersion`]s or from an explicit
//! header line. Quoted sub-fields may contain the separator and are kept as
//! a single field.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Field separator of the telemetry table.
pub const FIELD_SEPARATOR: char = ',';

/// Application value the telemetry source emits for rows it could not attribute.
const ERROR_ROW_MARKER: &str = "<error>";

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

const CURRENT_COLUMNS: &[&str] = &[
    "Application",
    "ProcessID",
    "SwapChainAddress",
    "PresentRuntime",
    "SyncInterval",
    "PresentFlags",
    "AllowsTearing",
    "PresentMode",
    "TimeInSeconds",
    "MsBetweenSimulationStart",
    "MsBetweenPresents",
    "MsBetweenDisplayChange",
    "MsInPresentAPI",
    "MsRenderPresentLatency",
    "MsUntilDisplayed",
    "MsPCLatency",
    "CPUStartQPCTimeInMs",
    "MsBetweenAppStart",
    "MsCPUBusy",
    "MsCPUWait",
    "MsGPULatency",
    "MsGPUTime",
    "MsGPUBusy",
    "MsGPUWait",
    "MsAnimationError",
    "AnimationTime",
    "MsFlipDelay",
    "EtwBufferFillPct",
    "EtwBuffersInUse",
    "EtwTotalBuffers",
    "EtwEventsLost",
    "EtwBuffersLost",
];

const LEGACY_COLUMNS: &[&str] = &[
    "Application",
    "ProcessID",
    "SwapChainAddress",
    "PresentRuntime",
    "SyncInterval",
    "PresentFlags",
    "AllowsTearing",
    "PresentMode",
    "TimeInSeconds",
    "MsBetweenSimulationStart",
    "MsBetweenPresents",
    "MsBetweenDisplayChange",
    "MsInPresentAPI",
    "MsRenderPresentLatency",
    "MsUntilDisplayed",
    "CPUStartQPCTimeInMs",
    "MsBetweenAppStart",
    "MsCPUBusy",
    "MsCPUWait",
    "MsGPULatency",
    "MsGPUTime",
    "MsGPUBusy",
    "MsGPUWait",
    "MsAnimationError",
    "AnimationTime",
    "MsFlipDelay",
    "EtwBufferFillPct",
    "EtwBuffersInUse",
    "EtwTotalBuffers",
    "EtwEventsLost",
    "EtwBuffersLost",
];

/// Known column layouts of the telemetry source.
///
/// `Current` carries PC latency tracking (32 columns), `Legacy` does not
/// (31 columns). Everything else is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVersion {
    #[default]
    Current,
    Legacy,
}

impl SchemaVersion {
    /// Column names in order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Current => CURRENT_COLUMNS,
            Self::Legacy => LEGACY_COLUMNS,
        }
    }

    /// Header line as the telemetry source prints it.
    pub fn header(self) -> String {
        self.columns().join(",")
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" | "pc-latency" => Ok(Self::Current),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown schema '{other}' (expected current|legacy)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Logical columns
// ---------------------------------------------------------------------------

/// Logical quantities the pipeline reads, independent of header spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Application,
    ProcessId,
    SwapChainAddress,
    Runtime,
    SyncInterval,
    AllowsTearing,
    PresentMode,
    TimeInSeconds,
    CpuStartQpcTimeMs,
    MsBetweenPresents,
    MsBetweenDisplayChange,
    MsInPresentApi,
    MsUntilDisplayed,
    QpcTime,
    Dropped,
    MsPcLatency,
    MsGpuActive,
}

impl Column {
    pub const ALL: [Column; 17] = [
        Column::Application,
        Column::ProcessId,
        Column::SwapChainAddress,
        Column::Runtime,
        Column::SyncInterval,
        Column::AllowsTearing,
        Column::PresentMode,
        Column::TimeInSeconds,
        Column::CpuStartQpcTimeMs,
        Column::MsBetweenPresents,
        Column::MsBetweenDisplayChange,
        Column::MsInPresentApi,
        Column::MsUntilDisplayed,
        Column::QpcTime,
        Column::Dropped,
        Column::MsPcLatency,
        Column::MsGpuActive,
    ];

    /// Header spellings that map to this column, matched case-insensitively.
    /// Older telemetry builds and other capture tools use different names.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Application => &["Application"],
            Self::ProcessId => &["ProcessID"],
            Self::SwapChainAddress => &["SwapChainAddress"],
            Self::Runtime => &["Runtime", "PresentRuntime"],
            Self::SyncInterval => &["SyncInterval"],
            Self::AllowsTearing => &["AllowsTearing"],
            Self::PresentMode => &["PresentMode"],
            Self::TimeInSeconds => &["TimeInSeconds", "AppRenderStart"],
            Self::CpuStartQpcTimeMs => &["CPUStartQPCTimeInMs", "CPUStartQPCTime"],
            Self::MsBetweenPresents => &[
                "MsBetweenPresents",
                "MsBetweenAppPresents",
                "FrameTime",
            ],
            Self::MsBetweenDisplayChange => &["MsBetweenDisplayChange", "DisplayedTime"],
            Self::MsInPresentApi => &["MsInPresentAPI"],
            Self::MsUntilDisplayed => &["MsUntilDisplayed", "DisplayLatency"],
            Self::QpcTime => &["QPCTime"],
            Self::Dropped => &["Dropped", "AppMissed"],
            Self::MsPcLatency => &["MsPCLatency"],
            Self::MsGpuActive => &["MsGPUBusy", "msGPUActive", "GPUBusy"],
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        self.aliases()[0]
    }
}

/// Name → position map for one input, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    indices: [Option<usize>; Column::ALL.len()],
    width: usize,
}

impl ColumnMap {
    /// Resolve column positions from a header line.
    pub fn from_header(header: &str) -> Self {
        let names: Vec<String> = split_fields(header)
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect();

        let mut indices = [None; Column::ALL.len()];
        for column in Column::ALL {
            indices[column.slot()] = names.iter().position(|name| {
                column
                    .aliases()
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(name))
            });
        }

        Self {
            indices,
            width: names.len(),
        }
    }

    /// Column map of a compiled-in schema.
    pub fn for_schema(schema: SchemaVersion) -> Self {
        Self::from_header(&schema.header())
    }

    /// Position of `column`, if the header carries it.
    pub fn index(&self, column: Column) -> Option<usize> {
        self.indices[column.slot()]
    }

    /// Whether the header carries `column`.
    pub fn has(&self, column: Column) -> bool {
        self.index(column).is_some()
    }

    /// Number of columns in the header.
    pub fn width(&self) -> usize {
        self.width
    }
}

/// Heuristic for an explicit header line at the start of an input.
pub fn looks_like_header(line: &str) -> bool {
    line.starts_with("Application") || line.contains("frametime")
}

/// Split one line into fields, keeping quoted sub-fields intact.
///
/// Separators inside double quotes do not split; the quotes themselves are
/// dropped and a doubled quote inside a quoted field yields one quote.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            FIELD_SEPARATOR if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Strip the executable suffix the telemetry source appends to process names.
pub fn normalize_process_name(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

// ---------------------------------------------------------------------------
// Process identity
// ---------------------------------------------------------------------------

/// Display name + numeric id of a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
}

impl ProcessInfo {
    pub fn new(name: impl AsRef<str>, pid: u32) -> Self {
        Self {
            name: normalize_process_name(name.as_ref()).to_string(),
            pid,
        }
    }
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.pid)
    }
}

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct RecordData {
    line: String,
    fields: Vec<String>,
    process: ProcessInfo,
    swap_chain: String,
    time: f64,
}

/// One parsed telemetry line. Immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(Arc<RecordData>);

impl RawRecord {
    /// Parse a live telemetry line against `columns`.
    ///
    /// Rejects rows whose field count does not match the schema, rows the
    /// source flagged as errors, and rows without a usable process id or
    /// start time.
    pub fn parse(line: &str, columns: &ColumnMap) -> Result<Self, RecordError> {
        let fields = split_fields(line);
        if fields.len() != columns.width() {
            return Err(RecordError::FieldCount {
                expected: columns.width(),
                found: fields.len(),
            });
        }

        let field = |column: Column| -> &str {
            columns
                .index(column)
                .and_then(|i| fields.get(i))
                .map(|s| s.trim())
                .unwrap_or("")
        };

        let application = field(Column::Application);
        if application == ERROR_ROW_MARKER {
            return Err(RecordError::ErrorRow);
        }

        let pid_text = field(Column::ProcessId);
        let pid = pid_text
            .parse::<u32>()
            .map_err(|_| RecordError::InvalidValue {
                column: Column::ProcessId.name(),
                value: pid_text.to_string(),
            })?;

        let time = if columns.has(Column::CpuStartQpcTimeMs) {
            parse_time(field(Column::CpuStartQpcTimeMs), Column::CpuStartQpcTimeMs)? / 1000.0
        } else {
            parse_time(field(Column::TimeInSeconds), Column::TimeInSeconds)?
        };

        let process = ProcessInfo::new(application, pid);
        let swap_chain = field(Column::SwapChainAddress).to_string();

        Ok(Self(Arc::new(RecordData {
            line: line.to_string(),
            fields,
            process,
            swap_chain,
            time,
        })))
    }

    /// Verbatim source line.
    pub fn line(&self) -> &str {
        &self.0.line
    }

    /// All fields in schema order.
    pub fn fields(&self) -> &[String] {
        &self.0.fields
    }

    /// Field at `index`, if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.0.fields.get(index).map(String::as_str)
    }

    pub fn process(&self) -> &ProcessInfo {
        &self.0.process
    }

    /// Process name without the executable suffix.
    pub fn process_name(&self) -> &str {
        &self.0.process.name
    }

    pub fn process_id(&self) -> u32 {
        self.0.process.pid
    }

    pub fn swap_chain(&self) -> &str {
        &self.0.swap_chain
    }

    /// Frame start on the hardware counter timeline, in seconds.
    pub fn time(&self) -> f64 {
        self.0.time
    }
}

fn parse_time(text: &str, column: Column) -> Result<f64, RecordError> {
    text.parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| RecordError::InvalidValue {
            column: column.name(),
            value: text.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

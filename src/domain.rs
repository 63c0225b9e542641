//! Core entity and enum types shared across the store, orchestrator, and API layers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub blob_path: String,
    pub original_name: String,
    pub byte_size: i64,
    pub duration_sec: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {}", s)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Audio,
    Ocr,
    Video,
    Risk,
}

impl PhaseName {
    pub const ANALYZER_PHASES: [PhaseName; 3] = [PhaseName::Audio, PhaseName::Ocr, PhaseName::Video];
    pub const ALL: [PhaseName; 4] = [PhaseName::Audio, PhaseName::Ocr, PhaseName::Video, PhaseName::Risk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Ocr => "ocr",
            Self::Video => "video",
            Self::Risk => "risk",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "audio" => Ok(Self::Audio),
            "ocr" => Ok(Self::Ocr),
            "video" => Ok(Self::Video),
            "risk" => Ok(Self::Risk),
            _ => Err(format!("invalid phase name: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid phase status: {}", s)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub purpose: String,
    pub platform: String,
    pub target_audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub video_id: String,
    pub status: JobStatus,
    pub metadata: JobMetadata,
    pub overall_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Aggressiveness,
    Discrimination,
    Misleading,
    PublicNuisance,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressiveness => "aggressiveness",
            Self::Discrimination => "discrimination",
            Self::Misleading => "misleading",
            Self::PublicNuisance => "public_nuisance",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "aggressiveness" => Ok(Self::Aggressiveness),
            "discrimination" => Ok(Self::Discrimination),
            "misleading" => Ok(Self::Misleading),
            "public_nuisance" => Ok(Self::PublicNuisance),
            _ => Err(format!("invalid risk category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("invalid risk level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSource {
    Audio,
    Ocr,
    Video,
}

impl RiskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Ocr => "ocr",
            Self::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "audio" => Ok(Self::Audio),
            "ocr" => Ok(Self::Ocr),
            "video" => Ok(Self::Video),
            _ => Err(format!("invalid risk source: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskItem {
    pub id: String,
    pub job_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub category: RiskCategory,
    pub subcategory: String,
    pub score: f64,
    pub level: RiskLevel,
    pub rationale: String,
    pub source: RiskSource,
    pub evidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditSessionStatus {
    Active,
    Exporting,
    Completed,
}

impl EditSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exporting => "exporting",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "active" => Ok(Self::Active),
            "exporting" => Ok(Self::Exporting),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("invalid edit session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditSession {
    pub id: String,
    pub job_id: String,
    pub status: EditSessionStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditActionType {
    Cut,
    Mute,
    Mosaic,
    Telop,
    Skip,
}

impl EditActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cut => "cut",
            Self::Mute => "mute",
            Self::Mosaic => "mosaic",
            Self::Telop => "telop",
            Self::Skip => "skip",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "cut" => Ok(Self::Cut),
            "mute" => Ok(Self::Mute),
            "mosaic" => Ok(Self::Mosaic),
            "telop" => Ok(Self::Telop),
            "skip" => Ok(Self::Skip),
            _ => Err(format!("invalid edit action type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditActionOptions {
    Mosaic {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default = "default_blur_strength")]
        blur_strength: u32,
    },
    Telop {
        text: String,
        x: f64,
        y: f64,
        font_size: f64,
        font_color: String,
        background_color: Option<String>,
    },
}

fn default_blur_strength() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditAction {
    pub id: String,
    pub session_id: String,
    pub action_type: EditActionType,
    pub start_sec: f64,
    pub end_sec: f64,
    pub risk_item_id: Option<String>,
    pub options: Option<EditActionOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid export status: {}", s)),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub session_id: String,
    pub status: ExportStatus,
    pub output_blob_path: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

use serde::{Deserialize, Serialize};

/// One user-initiated image generation request.
///
/// The id is minted locally by the orchestrator; `prediction_id` is the
/// inference provider's own id, stored so asynchronous webhooks (which echo
/// the provider id, not ours) can find the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    pub user_id: String,
    pub prediction_id: Option<String>,
    pub status: GenerationStatus,
    pub output_urls: Vec<String>,
    pub error: Option<String>,
    /// Storage path of the uploaded source photo, deleted after success.
    pub source_image_path: Option<String>,
    /// Credits deducted for this generation; refunded in full on failure.
    pub cost: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateGeneration {
    pub user_id: String,
    pub source_image_path: Option<String>,
    pub cost: i64,
}

/// Lifecycle status of a generation. Matches the inference provider's
/// status vocabulary so webhook payloads map directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal states never transition again; refunds key off this.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Room categories the user can pick for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    LivingRoom,
    Bedroom,
    Kitchen,
    DiningRoom,
    Bathroom,
    HomeOffice,
    Nursery,
}

impl RoomType {
    /// Human-readable form used in the generated prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::LivingRoom => "living room",
            Self::Bedroom => "bedroom",
            Self::Kitchen => "kitchen",
            Self::DiningRoom => "dining room",
            Self::Bathroom => "bathroom",
            Self::HomeOffice => "home office",
            Self::Nursery => "nursery",
        }
    }
}

/// Interior design styles offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleTheme {
    Modern,
    Minimalist,
    Scandinavian,
    Industrial,
    Bohemian,
    Coastal,
    MidCentury,
    Rustic,
    Japandi,
    ArtDeco,
}

impl StyleTheme {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Minimalist => "minimalist",
            Self::Scandinavian => "Scandinavian",
            Self::Industrial => "industrial",
            Self::Bohemian => "bohemian",
            Self::Coastal => "coastal",
            Self::MidCentury => "mid-century modern",
            Self::Rustic => "rustic",
            Self::Japandi => "japandi",
            Self::ArtDeco => "art deco",
        }
    }

    /// Short descriptor woven into the prompt to anchor the style.
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::Modern => "clean lines, neutral palette, contemporary furniture",
            Self::Minimalist => "uncluttered surfaces, restrained palette, functional furniture",
            Self::Scandinavian => "light wood, white walls, cozy hygge textiles",
            Self::Industrial => "exposed brick, metal fixtures, raw concrete accents",
            Self::Bohemian => "layered textiles, plants, eclectic global decor",
            Self::Coastal => "airy whites, sea blues, natural rattan textures",
            Self::MidCentury => "teak furniture, organic curves, retro accent colors",
            Self::Rustic => "reclaimed wood, stone accents, warm earthy tones",
            Self::Japandi => "japanese minimalism, scandi warmth, low wooden furniture",
            Self::ArtDeco => "bold geometry, brass details, rich jewel tones",
        }
    }
}

/// Quality tier of a generation; determines the credit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Standard,
    Premium,
}

impl Quality {
    pub fn credit_cost(&self) -> i64 {
        match self {
            Self::Standard => 1,
            Self::Premium => 2,
        }
    }
}

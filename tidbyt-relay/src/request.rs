use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::foundation::error::{RelayError, RelayResult};

/// Notification text color when none is given.
pub const DEFAULT_TEXT_COLOR: &str = "#ffffff";
/// Background color when none is given.
pub const DEFAULT_BACKGROUND_COLOR: &str = "#000000";
/// Notification text size in points when none is given.
pub const DEFAULT_TEXT_SIZE: u32 = 14;
/// Image height in pixels when none is given.
pub const DEFAULT_IMAGE_HEIGHT: u32 = 32;
/// Image width in pixels when none is given.
pub const DEFAULT_IMAGE_WIDTH: u32 = 64;

/// Applet name used on the bus for everything that is not a notification.
pub const PROXY_APPLET_NAME: &str = "tidbyt-proxy";

/// The two request kinds accepted by the HTTP surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Text notification (`/api/notify`).
    Notify,
    /// Image display (`/api/image`).
    Image,
}

impl RequestKind {
    /// Name of the template that materializes this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Image => "image",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery options shared by every request kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Stream the rendered artifact back in the HTTP response.
    #[serde(default, deserialize_with = "null_as_default")]
    pub return_image: bool,
    /// Push into a specific installed app slot on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    /// Install without immediately showing the artifact on the device.
    #[serde(default, deserialize_with = "null_as_default")]
    pub background: bool,
}

/// Text notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    /// Text to show. Required.
    pub text: String,
    /// Text color; empty means [`DEFAULT_TEXT_COLOR`].
    #[serde(default, rename = "textcolor", deserialize_with = "null_as_default")]
    pub text_color: String,
    /// Background color; empty means [`DEFAULT_BACKGROUND_COLOR`].
    #[serde(default, rename = "bgcolor", deserialize_with = "null_as_default")]
    pub background_color: String,
    /// Text size in points; zero means [`DEFAULT_TEXT_SIZE`].
    #[serde(default, rename = "textsize", deserialize_with = "null_as_default")]
    pub text_size: u32,
    /// Icon name resolved against the icon registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Shared delivery options.
    #[serde(flatten)]
    pub delivery: DeliveryOptions,
}

/// Treat an explicit JSON `null` like an absent field.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

impl NotifyRequest {
    /// Decode a JSON request body.
    pub fn decode(body: &[u8]) -> RelayResult<Self> {
        serde_json::from_slice(body).map_err(|e| RelayError::decode(e.to_string()))
    }

    /// Fill unset fields. Explicitly set fields are left untouched.
    pub fn apply_defaults(mut self) -> Self {
        if self.text_color.is_empty() {
            self.text_color = DEFAULT_TEXT_COLOR.to_string();
        }
        if self.background_color.is_empty() {
            self.background_color = DEFAULT_BACKGROUND_COLOR.to_string();
        }
        if self.text_size == 0 {
            self.text_size = DEFAULT_TEXT_SIZE;
        }
        self.icon = self.icon.filter(|s| !s.is_empty());
        self.delivery = self.delivery.normalized();
        self
    }
}

/// Where the image bytes come from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ImageSource {
    /// Remote reference fetched by the renderer.
    #[serde(rename = "image_url")]
    Url(String),
    /// Base64 encoded bytes uploaded with the request.
    #[serde(rename = "image_data")]
    Inline(String),
}

impl ImageSource {
    /// Base64 encode uploaded bytes.
    pub fn inline(bytes: &[u8]) -> Self {
        Self::Inline(STANDARD.encode(bytes))
    }
}

/// Image display request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    /// Remote reference or inline upload.
    #[serde(flatten)]
    pub source: ImageSource,
    /// Background color; empty means [`DEFAULT_BACKGROUND_COLOR`].
    #[serde(rename = "bgcolor")]
    pub background_color: String,
    /// Height in pixels; zero means [`DEFAULT_IMAGE_HEIGHT`].
    pub height: u32,
    /// Width in pixels; zero means [`DEFAULT_IMAGE_WIDTH`].
    pub width: u32,
    /// Milliseconds per animation frame. Zero leaves the renderer default.
    pub delay: u32,
    /// Shared delivery options.
    #[serde(flatten)]
    pub delivery: DeliveryOptions,
}

#[derive(Deserialize)]
struct ImageJson {
    image: String,
    #[serde(default, deserialize_with = "null_as_default")]
    bgcolor: String,
    #[serde(default, deserialize_with = "null_as_default")]
    height: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    width: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    delay: u32,
    #[serde(flatten)]
    delivery: DeliveryOptions,
}

impl ImageRequest {
    /// Decode a JSON request body referencing a remote image.
    pub fn decode_json(body: &[u8]) -> RelayResult<Self> {
        let raw: ImageJson =
            serde_json::from_slice(body).map_err(|e| RelayError::decode(e.to_string()))?;
        if raw.image.is_empty() {
            return Err(RelayError::decode("field `image` must be non-empty"));
        }
        Ok(Self {
            source: ImageSource::Url(raw.image),
            background_color: raw.bgcolor,
            height: raw.height,
            width: raw.width,
            delay: raw.delay,
            delivery: raw.delivery,
        })
    }

    /// Fill unset dimensions and background. Explicitly set fields are left untouched.
    pub fn apply_defaults(mut self) -> Self {
        if self.height == 0 {
            self.height = DEFAULT_IMAGE_HEIGHT;
        }
        if self.width == 0 {
            self.width = DEFAULT_IMAGE_WIDTH;
        }
        if self.background_color.is_empty() {
            self.background_color = DEFAULT_BACKGROUND_COLOR.to_string();
        }
        self.delivery = self.delivery.normalized();
        self
    }
}

/// Accumulates the parts of a `multipart/form-data` image upload.
#[derive(Debug, Default)]
pub struct ImageForm {
    upload: Option<Vec<u8>>,
    background_color: String,
    height: u32,
    width: u32,
    delay: u32,
    delivery: DeliveryOptions,
}

impl ImageForm {
    /// Store the uploaded file bytes from the `image` field.
    pub fn set_upload(&mut self, bytes: impl Into<Vec<u8>>) {
        self.upload = Some(bytes.into());
    }

    /// Apply one text field. Unknown fields are ignored.
    pub fn set_field(&mut self, name: &str, value: &str) -> RelayResult<()> {
        let value = value.trim();
        match name {
            "bgcolor" => self.background_color = value.to_string(),
            "height" => self.height = parse_dimension(name, value)?,
            "width" => self.width = parse_dimension(name, value)?,
            "delay" => self.delay = parse_dimension(name, value)?,
            "return_image" => self.delivery.return_image = parse_flag(name, value)?,
            "background" => self.delivery.background = parse_flag(name, value)?,
            "installation_id" => self.delivery.installation_id = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }

    /// Build the request. Fails when no non-empty `image` file was uploaded.
    pub fn finish(self) -> RelayResult<ImageRequest> {
        let bytes = self
            .upload
            .ok_or_else(|| RelayError::decode("multipart field `image` is required"))?;
        if bytes.is_empty() {
            return Err(RelayError::decode("uploaded image is empty"));
        }
        Ok(ImageRequest {
            source: ImageSource::inline(&bytes),
            background_color: self.background_color,
            height: self.height,
            width: self.width,
            delay: self.delay,
            delivery: self.delivery,
        })
    }
}

fn parse_dimension(name: &str, value: &str) -> RelayResult<u32> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<u32>()
        .map_err(|e| RelayError::decode(format!("field `{name}`: {e}")))
}

fn parse_flag(name: &str, value: &str) -> RelayResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "off" | "no" => Ok(false),
        "1" | "true" | "on" | "yes" => Ok(true),
        other => Err(RelayError::decode(format!(
            "field `{name}`: invalid boolean '{other}'"
        ))),
    }
}

impl DeliveryOptions {
    fn normalized(mut self) -> Self {
        self.installation_id = self.installation_id.filter(|s| !s.is_empty());
        self
    }
}

/// A decoded request of either kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayRequest {
    /// Text notification.
    Notify(NotifyRequest),
    /// Image display.
    Image(ImageRequest),
}

impl DisplayRequest {
    /// Request kind, which also selects the template.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Notify(_) => RequestKind::Notify,
            Self::Image(_) => RequestKind::Image,
        }
    }

    /// Fill unset fields of the wrapped request.
    pub fn apply_defaults(self) -> Self {
        match self {
            Self::Notify(n) => Self::Notify(n.apply_defaults()),
            Self::Image(i) => Self::Image(i.apply_defaults()),
        }
    }

    /// Template used to materialize this request.
    pub fn template_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Applet name reported alongside bus publishes.
    pub fn applet_name(&self) -> &'static str {
        match self {
            Self::Notify(_) => RequestKind::Notify.as_str(),
            Self::Image(_) => PROXY_APPLET_NAME,
        }
    }

    /// Delivery options carried by the request.
    pub fn delivery_options(&self) -> &DeliveryOptions {
        match self {
            Self::Notify(n) => &n.delivery,
            Self::Image(i) => &i.delivery,
        }
    }
}

impl From<NotifyRequest> for DisplayRequest {
    fn from(value: NotifyRequest) -> Self {
        Self::Notify(value)
    }
}

impl From<ImageRequest> for DisplayRequest {
    fn from(value: ImageRequest) -> Self {
        Self::Image(value)
    }
}

#[cfg(test)]
#[path = "../tests/unit/request.rs"]
mod tests;

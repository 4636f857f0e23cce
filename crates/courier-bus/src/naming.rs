//! # Message Naming & Serialization
//!
//! Maps payload types to stable logical names and encodes/decodes content
//! by media type. Rust has no runtime type universe to search, so the type
//! universe is an explicit registry populated at configuration time: every
//! payload type a bus sends, publishes, or handles is registered once with
//! its wire name.
//!
//! Decoded payloads travel as `Arc<dyn Any + Send + Sync>`; typed handlers
//! downcast at the edge (see [`crate::handlers::typed_handler`]).

use courier_types::{BusError, MessageName};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A decoded payload of some registered type.
pub type AnyPayload = Arc<dyn Any + Send + Sync>;

/// Codec family a media type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Self-describing JSON via serde.
    Json,
    /// Raw bytes, passed through untouched.
    Raw,
}

/// Maps media types (case-insensitive, parameters ignored) to codec
/// families. `application/json` and `application/octet-stream` are
/// registered out of the box.
#[derive(Debug, Clone)]
pub struct SerializerRegistry {
    formats: HashMap<String, PayloadFormat>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut formats = HashMap::new();
        formats.insert("application/json".to_string(), PayloadFormat::Json);
        formats.insert(
            "application/octet-stream".to_string(),
            PayloadFormat::Raw,
        );
        Self { formats }
    }
}

impl SerializerRegistry {
    /// Registry with the default media types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an additional media type onto a codec family.
    pub fn register(&mut self, media_type: &str, format: PayloadFormat) {
        self.formats.insert(normalize_media_type(media_type), format);
    }

    /// Resolve a content type to its codec family.
    pub fn format_for(&self, content_type: &str) -> Result<PayloadFormat, BusError> {
        self.formats
            .get(&normalize_media_type(content_type))
            .copied()
            .ok_or_else(|| {
                BusError::InvalidRequest(format!("unsupported content type: {content_type}"))
            })
    }
}

/// Lowercase and strip parameters: `Application/JSON; charset=utf-8` and
/// `application/json` resolve identically.
fn normalize_media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Encodes and decodes one registered payload type.
trait PayloadCodec: Send + Sync {
    fn encode(
        &self,
        value: &(dyn Any + Send + Sync),
        format: PayloadFormat,
    ) -> Result<Vec<u8>, BusError>;

    fn decode(&self, data: &[u8], format: PayloadFormat) -> Result<AnyPayload, BusError>;
}

/// serde-backed codec; supports the JSON family.
struct SerdeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> PayloadCodec for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(
        &self,
        value: &(dyn Any + Send + Sync),
        format: PayloadFormat,
    ) -> Result<Vec<u8>, BusError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| BusError::InvalidRequest("payload type mismatch".to_string()))?;
        match format {
            PayloadFormat::Json => serde_json::to_vec(value)
                .map_err(|e| BusError::InvalidRequest(format!("serialize failed: {e}"))),
            PayloadFormat::Raw => Err(BusError::InvalidRequest(
                "type is not registered for raw content".to_string(),
            )),
        }
    }

    fn decode(&self, data: &[u8], format: PayloadFormat) -> Result<AnyPayload, BusError> {
        match format {
            PayloadFormat::Json => serde_json::from_slice::<T>(data)
                .map(|v| Arc::new(v) as AnyPayload)
                .map_err(|e| BusError::InvalidRequest(format!("deserialize failed: {e}"))),
            PayloadFormat::Raw => Err(BusError::InvalidRequest(
                "type is not registered for raw content".to_string(),
            )),
        }
    }
}

/// Pass-through codec for `Vec<u8>` payloads.
struct RawCodec;

impl PayloadCodec for RawCodec {
    fn encode(
        &self,
        value: &(dyn Any + Send + Sync),
        format: PayloadFormat,
    ) -> Result<Vec<u8>, BusError> {
        let value = value
            .downcast_ref::<Vec<u8>>()
            .ok_or_else(|| BusError::InvalidRequest("payload type mismatch".to_string()))?;
        match format {
            PayloadFormat::Raw => Ok(value.clone()),
            PayloadFormat::Json => serde_json::to_vec(value)
                .map_err(|e| BusError::InvalidRequest(format!("serialize failed: {e}"))),
        }
    }

    fn decode(&self, data: &[u8], format: PayloadFormat) -> Result<AnyPayload, BusError> {
        match format {
            PayloadFormat::Raw => Ok(Arc::new(data.to_vec()) as AnyPayload),
            PayloadFormat::Json => serde_json::from_slice::<Vec<u8>>(data)
                .map(|v| Arc::new(v) as AnyPayload)
                .map_err(|e| BusError::InvalidRequest(format!("deserialize failed: {e}"))),
        }
    }
}

struct RegisteredType {
    name: MessageName,
    codec: Arc<dyn PayloadCodec>,
}

/// The process-local type universe: name ↔ type with attached codecs.
#[derive(Default)]
pub struct MessageRegistry {
    by_name: HashMap<MessageName, Arc<RegisteredType>>,
    by_type: HashMap<TypeId, Arc<RegisteredType>>,
}

impl MessageRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serde payload type under a stable wire name.
    ///
    /// Later registrations for the same type or name replace earlier ones.
    pub fn register<T>(&mut self, name: MessageName)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<T>(), name, Arc::new(SerdeCodec::<T>::new()));
    }

    /// Register `Vec<u8>` as a raw (octet-stream) payload under a name.
    pub fn register_raw(&mut self, name: MessageName) {
        self.insert(TypeId::of::<Vec<u8>>(), name, Arc::new(RawCodec));
    }

    fn insert(&mut self, type_id: TypeId, name: MessageName, codec: Arc<dyn PayloadCodec>) {
        let registered = Arc::new(RegisteredType { name, codec });
        self.by_name
            .insert(registered.name.clone(), Arc::clone(&registered));
        self.by_type.insert(type_id, registered);
    }

    /// The wire name of a payload value.
    pub fn name_for(&self, payload: &(dyn Any + Send + Sync)) -> Result<&MessageName, BusError> {
        self.by_type
            .get(&payload.type_id())
            .map(|r| &r.name)
            .ok_or_else(|| BusError::UnknownMessage("unregistered payload type".to_string()))
    }

    /// Serialize a payload value with the codec family for `content_type`.
    pub fn encode(
        &self,
        payload: &(dyn Any + Send + Sync),
        content_type: &str,
        serializers: &SerializerRegistry,
    ) -> Result<(MessageName, Vec<u8>), BusError> {
        let registered = self
            .by_type
            .get(&payload.type_id())
            .ok_or_else(|| BusError::UnknownMessage("unregistered payload type".to_string()))?;
        let format = serializers.format_for(content_type)?;
        let bytes = registered.codec.encode(payload, format)?;
        Ok((registered.name.clone(), bytes))
    }

    /// Decode content bytes for a named message type.
    pub fn decode(
        &self,
        name: &MessageName,
        content_type: &str,
        data: &[u8],
        serializers: &SerializerRegistry,
    ) -> Result<AnyPayload, BusError> {
        let registered = self
            .by_name
            .get(name)
            .ok_or_else(|| BusError::UnknownMessage(name.to_string()))?;
        let format = serializers.format_for(content_type)?;
        registered.codec.decode(data, format)
    }
}

use rust_decimal::Decimal;
use sonicpay_core::level::level_from_bytes;
use sonicpay_core::platform::DeviceInfo;
use sonicpay_core::profile::{register_profiles_json, require_profile};
use sonicpay_core::receiver::StreamDecoder;
use sonicpay_core::{CaptureSupport, Encoder, FallbackConfig, TransferPayload};
use std::str::FromStr;
use wasm_bindgen::prelude::*;
use web_sys::AnalyserNode;

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_amount(amount: &str) -> Result<Decimal, JsValue> {
    Decimal::from_str(amount).map_err(js_error)
}

#[wasm_bindgen]
pub struct WasmEncoder {
    inner: Encoder,
}

#[wasm_bindgen]
impl WasmEncoder {
    #[wasm_bindgen(constructor)]
    pub fn new(profile: &str) -> Result<WasmEncoder, JsValue> {
        let profile = require_profile(profile).map_err(js_error)?;
        Encoder::new(&profile)
            .map(|encoder| WasmEncoder { inner: encoder })
            .map_err(js_error)
    }

    /// Encode a transfer stamped with the current time into audio samples at
    /// `sample_rate` (the AudioContext rate). Amount is a decimal string.
    #[wasm_bindgen]
    pub fn encode(&self, token_id: &str, amount: &str, sample_rate: u32) -> Result<Vec<f32>, JsValue> {
        let payload = TransferPayload::new(token_id, parse_amount(amount)?).map_err(js_error)?;
        let bytes = payload
            .encode(self.inner.profile().payload_format)
            .map_err(js_error)?;
        self.inner.encode_at_rate(&bytes, sample_rate).map_err(js_error)
    }
}

#[wasm_bindgen]
pub struct WasmReceiver {
    inner: StreamDecoder,
}

#[wasm_bindgen]
impl WasmReceiver {
    #[wasm_bindgen(constructor)]
    pub fn new(profile: &str, sample_rate: u32) -> Result<WasmReceiver, JsValue> {
        let profile = require_profile(profile).map_err(js_error)?;
        StreamDecoder::new(&profile, sample_rate)
            .map(|decoder| WasmReceiver { inner: decoder })
            .map_err(js_error)
    }

    /// Feed captured samples; returns the JSON of every payload completed by
    /// this chunk.
    #[wasm_bindgen]
    pub fn push(&mut self, samples: &[f32]) -> Result<js_sys::Array, JsValue> {
        let received = js_sys::Array::new();
        for payload in self.inner.push(samples).map_err(js_error)? {
            received.push(&JsValue::from_str(&payload.to_json().map_err(js_error)?));
        }
        Ok(received)
    }
}

/// Current level of an analyser node in [0, 1].
#[wasm_bindgen(js_name = analyserLevel)]
pub fn analyser_level(node: &AnalyserNode) -> f32 {
    let mut bytes = vec![0u8; node.frequency_bin_count() as usize];
    node.get_byte_frequency_data(&mut bytes);
    level_from_bytes(&bytes)
}

/// Why this browser cannot record, or `undefined` when it can.
#[wasm_bindgen(js_name = captureUnavailableReason)]
pub fn capture_unavailable_reason(user_agent: &str, has_get_user_media: bool) -> Option<String> {
    match DeviceInfo::new(user_agent, has_get_user_media).capture_support() {
        CaptureSupport::Supported => None,
        CaptureSupport::Unavailable { reason } => Some(reason),
    }
}

/// Register profiles from a `{ "name": { ... } }` JSON document.
#[wasm_bindgen(js_name = registerProfiles)]
pub fn register_profiles(json: &str) -> Result<js_sys::Array, JsValue> {
    let names = register_profiles_json(json).map_err(js_error)?;
    Ok(names.iter().map(|name| JsValue::from_str(name)).collect())
}

/// Link to the external receiver page for a token.
#[wasm_bindgen(js_name = fallbackUrl)]
pub fn fallback_url(base_url: &str, bot: &str, token_id: &str, amount: &str) -> Result<String, JsValue> {
    let fallback = FallbackConfig {
        base_url: base_url.to_string(),
        bot: bot.to_string(),
    };
    fallback
        .url_for(token_id, parse_amount(amount)?)
        .map(|url| url.to_string())
        .map_err(js_error)
}

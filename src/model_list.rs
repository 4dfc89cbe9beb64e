use crate::channels::Channel;
use crate::family::Family;
use serde_json::{Value, json};

/// Raw model entries as the upstream family lists them. The aggregator does
/// not filter beyond the Gemini generateContent check; whatever the upstream
/// exposes is reshaped as-is.
pub fn extract_raw_models(listing: &Value, provider: Family) -> Vec<Value> {
    let key = match provider {
        Family::Gemini => "models",
        _ => "data",
    };
    listing
        .get(key)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Upstream model id, normalized: Gemini entries drop the `models/` prefix.
fn model_id(raw: &Value, provider: Family) -> Option<String> {
    match provider {
        Family::Gemini => {
            let name = raw.get("name").and_then(|v| v.as_str())?;
            Some(name.strip_prefix("models/").unwrap_or(name).to_string())
        }
        _ => raw
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}

fn generates_content(raw: &Value, provider: Family) -> bool {
    if provider != Family::Gemini {
        return true;
    }
    raw.get("supportedGenerationMethods")
        .and_then(|v| v.as_array())
        .map(|methods| {
            methods
                .iter()
                .any(|m| m.as_str() == Some("generateContent"))
        })
        .unwrap_or(true)
}

/// Reshape an upstream listing into the ingress family's list schema.
pub fn reshape(listing: &Value, provider: Family, ingress: Family) -> Value {
    let raw_models = extract_raw_models(listing, provider);
    match ingress {
        Family::Openai => {
            let data: Vec<Value> = raw_models
                .iter()
                .filter(|raw| generates_content(raw, provider))
                .filter_map(|raw| {
                    if provider == Family::Openai {
                        return Some(raw.clone());
                    }
                    let id = model_id(raw, provider)?;
                    Some(json!({
                        "id": id,
                        "object": "model",
                        "created": raw.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
                        "owned_by": provider.as_str(),
                    }))
                })
                .collect();
            json!({ "object": "list", "data": data })
        }
        Family::Anthropic => {
            let data: Vec<Value> = raw_models
                .iter()
                .filter(|raw| generates_content(raw, provider))
                .filter_map(|raw| {
                    if provider == Family::Anthropic {
                        return Some(raw.clone());
                    }
                    let id = model_id(raw, provider)?;
                    let display_name = raw
                        .get("displayName")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&id)
                        .to_string();
                    Some(json!({
                        "type": "model",
                        "id": id,
                        "display_name": display_name,
                        "created_at": raw.get("created_at").cloned().unwrap_or(Value::Null),
                    }))
                })
                .collect();
            let first_id = data.first().and_then(|m| m.get("id").cloned());
            let last_id = data.last().and_then(|m| m.get("id").cloned());
            json!({
                "data": data,
                "has_more": false,
                "first_id": first_id,
                "last_id": last_id,
            })
        }
        Family::Gemini => {
            let models: Vec<Value> = raw_models
                .iter()
                .filter_map(|raw| {
                    if provider == Family::Gemini {
                        let name = raw.get("name").and_then(|v| v.as_str())?;
                        return Some(json!({
                            "name": name,
                            "supportedGenerationMethods": raw
                                .get("supportedGenerationMethods")
                                .cloned()
                                .unwrap_or_else(|| json!(["generateContent"])),
                        }));
                    }
                    let id = model_id(raw, provider)?;
                    Some(json!({
                        "name": format!("models/{id}"),
                        "supportedGenerationMethods": ["generateContent"],
                    }))
                })
                .collect();
            json!({ "models": models })
        }
    }
}

/// Fetch a channel's upstream listing and reshape it for the caller.
pub async fn list_models_for_channel(
    client: &reqwest::Client,
    channel: &Channel,
    ingress: Family,
) -> Result<Value, crate::upstream::UpstreamCallError> {
    let listing = crate::upstream::call_list_models(client, channel).await?;
    Ok(reshape(&listing, channel.provider, ingress))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_listing_reshapes_to_openai() {
        let listing = json!({ "models": [
            { "name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent"] },
            { "name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"] },
        ]});
        let reshaped = reshape(&listing, Family::Gemini, Family::Openai);
        assert_eq!(reshaped["object"], "list");
        let data = reshaped["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["id"], "gemini-1.5-pro");
        assert_eq!(data[0]["object"], "model");
        assert_eq!(data[0]["owned_by"], "gemini");
    }

    #[test]
    fn openai_listing_reshapes_to_anthropic() {
        let listing = json!({ "object": "list", "data": [
            { "id": "gpt-4o", "object": "model", "created": 1715367049 },
        ]});
        let reshaped = reshape(&listing, Family::Openai, Family::Anthropic);
        let data = reshaped["data"].as_array().unwrap();
        assert_eq!(data[0]["type"], "model");
        assert_eq!(data[0]["id"], "gpt-4o");
        assert_eq!(data[0]["display_name"], "gpt-4o");
        assert_eq!(reshaped["first_id"], "gpt-4o");
        assert_eq!(reshaped["has_more"], false);
    }

    #[test]
    fn anthropic_listing_reshapes_to_gemini() {
        let listing = json!({ "data": [
            { "type": "model", "id": "claude-3-5-sonnet-20241022" },
        ]});
        let reshaped = reshape(&listing, Family::Anthropic, Family::Gemini);
        assert_eq!(
            reshaped["models"][0]["name"],
            "models/claude-3-5-sonnet-20241022"
        );
        assert_eq!(
            reshaped["models"][0]["supportedGenerationMethods"][0],
            "generateContent"
        );
    }

    #[test]
    fn same_family_passes_entries_through() {
        let listing = json!({ "object": "list", "data": [
            { "id": "gpt-4o", "object": "model", "created": 5, "owned_by": "openai" },
        ]});
        let reshaped = reshape(&listing, Family::Openai, Family::Openai);
        assert_eq!(reshaped["data"][0]["created"], 5);
        assert_eq!(reshaped["data"][0]["owned_by"], "openai");
    }
}

use super::types::{BaiduChatBody, BaiduMessage};

/// ERNIE treats temperature as a strict (0, 1] range; a near-zero value keeps answers
/// deterministic.
pub(crate) const TEMPERATURE: f64 = 0.01;

pub(crate) fn build_baidu_body<'a>(role_prompt: &'a str, command_prompt: &'a str) -> BaiduChatBody<'a> {
    BaiduChatBody {
        temperature: TEMPERATURE,
        stream: true,
        system: Some(role_prompt).filter(|prompt| !prompt.is_empty()),
        messages: vec![BaiduMessage {
            role: "user",
            content: command_prompt,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_carries_system_and_single_user_message() {
        let body = serde_json::to_value(build_baidu_body("translate", "hello")).unwrap();
        assert_eq!(
            body,
            json!({
                "temperature": 0.01,
                "stream": true,
                "system": "translate",
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let body = serde_json::to_value(build_baidu_body("", "hello")).unwrap();
        assert!(body.get("system").is_none());
        assert_eq!(body["stream"], true);
    }
}

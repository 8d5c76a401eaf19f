use serde::Deserialize;
use serde_json::Value;

/// 对话框架每次调用动作时提交的请求体
#[derive(Debug, Deserialize, Default)]
pub struct ActionRequest {
    pub next_action: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub tracker: Tracker,
}

impl ActionRequest {
    pub fn sender(&self) -> &str {
        if self.sender_id.is_empty() {
            &self.tracker.sender_id
        } else {
            &self.sender_id
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Tracker {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub latest_message: Message,
}

#[derive(Debug, Deserialize, Default)]
pub struct Message {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Entity {
    pub entity: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl Entity {
    /// 只有字符串和数字算作识别出的实体值
    fn text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Tracker {
    /// 最近一条用户消息中名为 `name` 且不带 role/group 的实体值
    pub fn latest_entity_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = String> + 'a {
        self.latest_message
            .entities
            .iter()
            .filter(move |e| e.entity == name && e.role.is_none() && e.group.is_none())
            .filter_map(Entity::text)
    }

    pub fn latest_entity_value(&self, name: &str) -> Option<String> {
        self.latest_entity_values(name).next()
    }
}

//! 工具描述与参数校验
//!
//! 工具服务给出的 JSON Schema（inputSchema）被压平为 ToolDescriptor：名称、描述、
//! 有序参数表（类型 / 是否必需 / 描述）。ToolDescriptor 既用于渲染 system prompt，
//! 也用于在调用前校验模型给出的参数，缺参、未知参数、明显类型不符都在到达工具服务之前报告。

use serde::Serialize;
use serde_json::{Map, Value};

/// 单个参数的声明
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    /// JSON Schema 类型名；多类型用 `|` 连接，未声明时为 `any`
    pub param_type: String,
    pub required: bool,
    pub description: String,
}

/// 工具目录中的一项，获取后不可变
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            param_type: param_type.into(),
            required,
            description: description.into(),
        });
        self
    }

    /// 从 JSON Schema 对象（`{"type":"object","properties":{...},"required":[...]}`）构建
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Map<String, Value>,
    ) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(param_name, info)| ParamSpec {
                        name: param_name.clone(),
                        param_type: schema_type(info),
                        required: required.contains(&param_name.as_str()),
                        description: info
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// 校验参数；返回所有问题（缺少必需参数 / 未声明参数 / 类型不符）
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for p in self.parameters.iter().filter(|p| p.required) {
            match args.get(&p.name) {
                None | Some(Value::Null) => {
                    problems.push(format!("missing required parameter '{}'", p.name))
                }
                Some(_) => {}
            }
        }

        // 未声明任何参数时不限制（服务端 schema 可能为空对象）
        if !self.parameters.is_empty() {
            for (key, value) in args {
                match self.param(key) {
                    None => problems.push(format!("unknown parameter '{key}'")),
                    Some(p) if !type_matches(&p.param_type, value) => problems.push(format!(
                        "parameter '{key}' expects {}, got {}",
                        p.param_type,
                        json_type_name(value)
                    )),
                    Some(_) => {}
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// 渲染为 system prompt 中的一项
    pub fn render_for_prompt(&self) -> String {
        if self.parameters.is_empty() {
            return format!("- {}: {}", self.name, self.description);
        }
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                format!(
                    "    - {} ({}, {}): {}",
                    p.name,
                    p.param_type,
                    if p.required { "required" } else { "optional" },
                    p.description
                )
            })
            .collect();
        format!(
            "- {}: {}\n  Parameters:\n{}",
            self.name,
            self.description,
            params.join("\n")
        )
    }
}

fn schema_type(info: &Value) -> String {
    match info.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(ts)) => {
            let names: Vec<&str> = ts.iter().filter_map(Value::as_str).collect();
            if names.is_empty() {
                "any".to_string()
            } else {
                names.join("|")
            }
        }
        _ => "any".to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    declared.split('|').any(|t| match t {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // any / 未知类型 / anyOf 组合不做检查
        _ => true,
    })
}

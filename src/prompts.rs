//! Where prompts and the system prompt come from.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"Role: 对话意图识别模型
Background: 用户需要一个能够识别对话中是否含有指令的小模型，这些指令可能与智能家居控制或大模型调用相关。
Profile: 你是一个自然语言处理和对话模型，擅长理解复杂的对话内容，能够准确识别出对话中的显式和隐式指令意图。
Skills: 你能精确识别对话中的指令意图，包括智能家居控制和大模型调用，并能发现多轮对话中的潜在需求。
Goals: 准确识别对话中的指令意图，并以JSON格式输出结果。
Constrains:
1. 仅输出JSON格式的结果，不包含任何额外的分析或解释。
2. 能够识别多种对话场景，包括日常对话、带有唤醒词的直接命令、以及多文本对话中的潜在指令。
3. 能理解对话中的隐喻、省略和场景暗示。
4. 支持多用户对话场景分析。

WakeupWord: {"小爱"}
OutputFormat: JSON格式（仅包含has_command字段）

Examples:
[
  {
    "dialogue": [
      {"speaker": "父亲", "content": "今天天气这么好，咱们把窗户打开通通风吧。"},
      {"speaker": "母亲", "content": "好主意，顺便把空气净化器关掉。"}
    ],
    "has_command": true
  },
  {
    "dialogue": [
      {"speaker": "女儿", "content": "妈妈，我今天考试得了95分！"},
      {"speaker": "母亲", "content": "太棒了，宝贝！晚上给你做你最爱吃的红烧鸡翅。"}
    ],
    "has_command": false
  }
]
"#;

const DEFAULT_PROMPTS: [&str; 9] = [
    "打开客厅的灯。",
    "贾维斯，明天的天气怎么样。",
    "今天天气真好。",
    "用户A：\"哇，外面好亮啊。\"\n用户B：\"是啊，该起床了。\"",
    "用户A：\"今天我出门了，家里只有猫。\"\n用户B：\"记得给它留点水和猫粮。\"",
    "用户A：\"电费又涨了，得省着点用。\"\n用户B：\"是啊，最近用电有点多。\"",
    "用户A：\"贾维斯，把健身房的温度调低点。\"\n用户B：\"顺便放点动感音乐。\"",
    "用户A：\"明天下雨唉！\"\n用户B：\"那明天早点出门吧。\"",
    "用户A：\"数学题太难了。\"\n用户B：\"用学习平板查下解题步骤。\"",
];

#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    TextFile(PathBuf),
    JsonFile(PathBuf),
    InputsDir(PathBuf),
    Defaults,
}

pub fn default_prompts() -> Vec<String> {
    DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect()
}

/// Load prompts from `source`, falling back to the built-in list when the
/// source fails or yields nothing.
pub fn load_prompts(source: &PromptSource) -> Vec<String> {
    let loaded = match source {
        PromptSource::TextFile(path) => load_text_file(path),
        PromptSource::JsonFile(path) => load_json_file(path),
        PromptSource::InputsDir(path) => load_inputs_dir(path),
        PromptSource::Defaults => return default_prompts(),
    };

    match loaded {
        Ok(prompts) if !prompts.is_empty() => {
            info!("Loaded {} prompts from {:?}", prompts.len(), source);
            prompts
        }
        Ok(_) => {
            warn!("{:?} has no prompts, using the built-in list", source);
            default_prompts()
        }
        Err(e) => {
            error!("Failed to load prompts from {:?}: {:#}", source, e);
            default_prompts()
        }
    }
}

/// One prompt per non-blank line.
pub fn load_text_file(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn load_json_file(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
    let value: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {} as JSON", path.display()))?;
    prompts_from_json(value)
        .with_context(|| format!("Unsupported prompt layout in {}", path.display()))
}

/// Every `*.json` file in the folder, in file-name order.
pub fn load_inputs_dir(dir: &Path) -> Result<Vec<String>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read inputs folder {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    if files.is_empty() {
        warn!("No JSON files in {}", dir.display());
    }

    let mut prompts = Vec::new();
    for file in &files {
        info!("Loading prompts from {}", file.display());
        prompts.extend(load_json_file(file)?);
    }
    Ok(prompts)
}

/// Dataset layout (array of dialogue objects) becomes one prompt per whole
/// serialized item; a plain array or `{"prompts": [...]}` gives one prompt per
/// non-empty element.
fn prompts_from_json(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) if items.iter().all(is_dialogue_item) => {
            info!("Detected dialogue dataset layout ({} items)", items.len());
            Ok(items.iter().map(Value::to_string).collect())
        }
        Value::Array(items) => Ok(items.into_iter().filter_map(prompt_text).collect()),
        Value::Object(mut obj) => match obj.remove("prompts") {
            Some(Value::Array(items)) => Ok(items.into_iter().filter_map(prompt_text).collect()),
            _ => anyhow::bail!("expected an array or an object with a \"prompts\" array"),
        },
        _ => anyhow::bail!("expected an array or an object with a \"prompts\" array"),
    }
}

fn is_dialogue_item(item: &Value) -> bool {
    item.as_object()
        .is_some_and(|o| o.contains_key("dialogue") || o.contains_key("dialog"))
}

fn prompt_text(item: Value) -> Option<String> {
    match item {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Array(ref a) if a.is_empty() => None,
        Value::Object(ref o) if o.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// The system prompt file's contents, or the built-in prompt when no file is
/// given or it cannot be read.
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Loaded system prompt from {}", path.display());
            text
        }
        Ok(_) => {
            warn!("System prompt file {} is empty, using the default", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            error!("Failed to read system prompt {}: {}", path.display(), e);
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

//! Intent classifier: one-shot routing of the first planning message.
//!
//! Rules, highest priority first:
//!
//! 1. empty or whitespace → simple
//! 2. ends with `?`/`？` and has no build verb → question
//! 3. any complex signal → complex
//! 4. informational prefix and no build verb → question
//! 5. single-operation verb, at most 20 tokens, no scope word → simple
//! 6. otherwise → complex
//!
//! Complex signals: more than 25 tokens, a system/platform scope word,
//! a conjunction together with a build verb, or three distinct build verbs.

use std::collections::HashSet;
use weaver_core::session::ComplexityHint;

const COMPLEX_TOKEN_LIMIT: usize = 25;
const SIMPLE_TOKEN_LIMIT: usize = 20;

const BUILD_VERBS_ZH: &[&str] = &[
    "创建", "新建", "搭建", "构建", "开发", "生成", "建立", "设计", "制作", "实现", "做一个", "做个",
];
const BUILD_VERBS_EN: &[&str] = &[
    "build", "create", "make", "develop", "generate", "design", "implement", "construct", "setup",
];

const SCOPE_WORDS_ZH: &[&str] = &[
    "系统", "平台", "应用", "网站", "商城", "门户", "后台", "小程序", "全套", "完整",
];
const SCOPE_WORDS_EN: &[&str] = &[
    "system", "platform", "app", "application", "website", "portal", "crm", "erp", "dashboard",
    "marketplace",
];

const CONJUNCTIONS_ZH: &[&str] = &["和", "以及", "并且", "同时", "然后", "还要", "并"];
const CONJUNCTIONS_EN: &[&str] = &["and", "also", "plus", "then"];

const SINGLE_OP_ZH: &[&str] = &[
    "加", "添加", "增加", "删除", "删", "修改", "改", "重命名", "更新", "插入", "去掉", "移除",
];
const SINGLE_OP_EN: &[&str] = &[
    "add", "remove", "delete", "rename", "change", "update", "insert", "modify", "drop", "alter",
];

const INFO_PREFIX_ZH: &[&str] = &[
    "查询", "列出", "显示", "查看", "什么", "怎么", "如何", "哪些", "多少", "有没有", "有哪些",
];
const INFO_PREFIX_EN: &[&str] = &[
    "what", "how", "which", "where", "why", "who", "when", "show", "list", "tell", "is", "are",
    "does", "do", "can", "explain", "describe",
];

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Count tokens: one per CJK character, one per run of letters/digits.
pub fn count_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

/// Lowercased runs of non-CJK letters/digits, in order.
fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() && !is_cjk(c) {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Which entries of a keyword list appear in the message.
fn matched<'a>(text: &str, words: &HashSet<&str>, zh: &[&'a str], en: &[&'a str]) -> Vec<&'a str> {
    zh.iter()
        .filter(|k| text.contains(**k))
        .chain(en.iter().filter(|k| words.contains(**k)))
        .copied()
        .collect()
}

fn has_informational_prefix(text: &str, first_word: Option<&str>) -> bool {
    INFO_PREFIX_ZH.iter().any(|p| text.starts_with(p))
        || first_word.is_some_and(|w| INFO_PREFIX_EN.contains(&w))
}

/// Classify a raw user message. Pure: same input, same answer.
pub fn classify_request(message: &str) -> ComplexityHint {
    let text = message.trim();
    if text.is_empty() {
        return ComplexityHint::Simple;
    }

    let word_list = words(text);
    let word_set: HashSet<&str> = word_list.iter().map(String::as_str).collect();
    let tokens = count_tokens(text);

    let build_verbs = matched(text, &word_set, BUILD_VERBS_ZH, BUILD_VERBS_EN);
    let has_build_verb = !build_verbs.is_empty();

    if (text.ends_with('?') || text.ends_with('？')) && !has_build_verb {
        return ComplexityHint::Question;
    }

    let has_scope = !matched(text, &word_set, SCOPE_WORDS_ZH, SCOPE_WORDS_EN).is_empty();
    let has_conjunction = !matched(text, &word_set, CONJUNCTIONS_ZH, CONJUNCTIONS_EN).is_empty();
    let distinct_build_verbs: HashSet<&str> = build_verbs.into_iter().collect();

    let complex = tokens > COMPLEX_TOKEN_LIMIT
        || has_scope
        || (has_conjunction && has_build_verb)
        || distinct_build_verbs.len() >= 3;
    if complex {
        return ComplexityHint::Complex;
    }

    let first_word = word_list
        .first()
        .filter(|_| !text.starts_with(is_cjk))
        .map(String::as_str);
    if has_informational_prefix(text, first_word) && !has_build_verb {
        return ComplexityHint::Question;
    }

    let has_single_op = !matched(text, &word_set, SINGLE_OP_ZH, SINGLE_OP_EN).is_empty();
    if has_single_op && tokens <= SIMPLE_TOKEN_LIMIT && !has_scope {
        return ComplexityHint::Simple;
    }

    ComplexityHint::Complex
}

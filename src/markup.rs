//! 宿主消息标记
//!
//! 纯文本与 `[类型:数据]` 标签交错组成。文本与标签数据中的 `\`、`[`、`]`
//! 以反斜杠转义。

use crate::error::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Face(String),
    AtAll,
    AtUser(u64),
    ImageOnline(String),
    ImageBase64(String),
    BigFace { field: i32, buf: String },
}

/// 转义纯文本，使其可以安全地嵌入标记串
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 去除转义，孤立的末尾反斜杠原样保留
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(text) => f.write_str(&escape(text)),
            Token::Face(id) => write!(f, "[face:{}]", escape(id)),
            Token::AtAll => f.write_str("[at:all]"),
            Token::AtUser(id) => write!(f, "[at:{}]", id),
            Token::ImageOnline(url) => write!(f, "[image_online:{}]", escape(url)),
            Token::ImageBase64(data) => write!(f, "[image_base64:{}]", escape(data)),
            Token::BigFace { field, buf } => write!(f, "[big_face:{},{}]", field, escape(buf)),
        }
    }
}

/// 将标记序列序列化为字符串
pub fn serialize(tokens: &[Token]) -> String {
    tokens.iter().map(Token::to_string).collect()
}

/// 解析标记串
///
/// 未知标签、未闭合的 `[` 以及非数字的 `[at:..]` 都视为普通文本；
/// 缺少逗号或 field 非整数的 `[big_face:..]` 返回格式错误。
pub fn parse(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                // 转义字符后面跟着的一个完整字符按字面处理
                let rest = &input[i + 1..];
                match rest.chars().next() {
                    Some(c) => {
                        text.push(c);
                        i += 1 + c.len_utf8();
                    }
                    None => {
                        text.push('\\');
                        i += 1;
                    }
                }
            }
            b'[' => match find_close(bytes, i + 1) {
                Some(end) => {
                    let raw = &input[i + 1..end];
                    match parse_tag(raw)? {
                        Some(token) => {
                            flush_text(&mut text, &mut tokens);
                            tokens.push(token);
                        }
                        None => text.push_str(&unescape(&input[i..=end])),
                    }
                    i = end + 1;
                }
                None => {
                    text.push('[');
                    i += 1;
                }
            },
            _ => {
                let c = input[i..].chars().next().unwrap_or_default();
                text.push(c);
                i += c.len_utf8().max(1);
            }
        }
    }

    flush_text(&mut text, &mut tokens);
    Ok(tokens)
}

fn flush_text(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    }
}

/// 从 `start` 开始寻找未转义的 `]`；遇到未转义的 `[` 视为未闭合
fn find_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b']' => return Some(i),
            b'[' => return None,
            _ => i += 1,
        }
    }
    None
}

fn parse_tag(raw: &str) -> Result<Option<Token>> {
    let Some((kind, data)) = raw.split_once(':') else {
        return Ok(None);
    };
    let data = unescape(data);
    let token = match kind {
        "face" if !data.is_empty() => Token::Face(data),
        "at" if data == "all" => Token::AtAll,
        "at" => match data.parse::<u64>() {
            Ok(id) => Token::AtUser(id),
            Err(_) => return Ok(None),
        },
        "image_online" => Token::ImageOnline(data),
        "image_base64" => Token::ImageBase64(data),
        "big_face" => parse_big_face(&data)?,
        _ => return Ok(None),
    };
    Ok(Some(token))
}

/// `field,buf`，buf 可以包含逗号
fn parse_big_face(data: &str) -> Result<Token> {
    let (field, buf) = data
        .split_once(',')
        .ok_or_else(|| Error::Format(format!("big_face 缺少分隔符: {}", data)))?;
    let field = field
        .parse::<i32>()
        .map_err(|_| Error::Format(format!("big_face 字段无效: {}", field)))?;
    Ok(Token::BigFace {
        field,
        buf: buf.to_string(),
    })
}

/// 把相邻文本合并，用于比较语义等价的序列
pub fn normalize(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match (out.last_mut(), token) {
            (_, Token::Text(t)) if t.is_empty() => {}
            (Some(Token::Text(prev)), Token::Text(t)) => prev.push_str(&t),
            (_, token) => out.push(token),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    #[test]
    fn parses_every_tag_kind() {
        let tokens = parse(
            "hi[face:14][at:all][at:12345][image_online:http://x/a.png][image_base64:QUJD][big_face:3,A,B]",
        )
        .unwrap();
        assert_eq!(
            tokens,
            vec![
                text("hi"),
                Token::Face("14".into()),
                Token::AtAll,
                Token::AtUser(12345),
                Token::ImageOnline("http://x/a.png".into()),
                Token::ImageBase64("QUJD".into()),
                Token::BigFace {
                    field: 3,
                    buf: "A,B".into()
                },
            ]
        );
    }

    #[rstest]
    #[case("[unknown:1]", "[unknown:1]")]
    #[case("[at:bob]", "[at:bob]")]
    #[case("a[b", "a[b")]
    #[case("no colon [here]", "no colon [here]")]
    #[case("\\[表情1\\]", "[表情1]")]
    #[case("trailing\\", "trailing\\")]
    fn non_tags_are_literal_text(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse(input).unwrap(), vec![text(expected)]);
    }

    #[rstest]
    #[case("[big_face:3]")]
    #[case("[big_face:x,ABC]")]
    fn malformed_big_face_is_format_error(#[case] input: &str) {
        assert!(matches!(parse(input), Err(Error::Format(_))));
    }

    #[test]
    fn round_trip_preserves_tokens() {
        let tokens = vec![
            text("a [literal] \\ b"),
            Token::Face("2".into()),
            text("x"),
            Token::AtUser(7),
            Token::ImageOnline("http://h/p?q=[1]".into()),
            Token::BigFace {
                field: 1,
                buf: "buf,with]brackets".into(),
            },
            Token::AtAll,
            text("tail"),
        ];
        let serialized = serialize(&tokens);
        assert_eq!(normalize(parse(&serialized).unwrap()), normalize(tokens));
    }

    #[test]
    fn adjacent_text_merges_on_round_trip() {
        let tokens = vec![text("ab"), text("cd"), Token::AtAll];
        let parsed = parse(&serialize(&tokens)).unwrap();
        assert_eq!(parsed, vec![text("abcd"), Token::AtAll]);
    }

    #[test]
    fn escape_then_unescape_is_identity() {
        let s = "[表情1] \\n ]]";
        assert_eq!(unescape(&escape(s)), s);
    }
}

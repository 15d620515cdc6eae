//! Command argument parsing.
//!
//! Splits a command's text into arguments and recognises custom emote
//! mentions (`<:name:id>` and `<a:name:id>`).

use fancy_regex::Regex;

use crate::common::types::emote_url;
use crate::common::EmoteId;
use crate::emotes::emote_name_from_path;

/// A custom emote mention found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteMention {
    pub animated: bool,
    pub name: String,
    pub id: EmoteId,
}

impl EmoteMention {
    pub fn url(&self) -> String {
        emote_url(self.id, self.animated)
    }
}

/// Which emotes a listing or export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmoteFilter {
    #[default]
    All,
    Static,
    Animated,
}

impl EmoteFilter {
    /// Parse the optional type argument of `list` and `export`.
    pub fn parse(argument: Option<&str>) -> Result<Self, String> {
        match argument.map(str::to_lowercase).as_deref() {
            None | Some("all") => Ok(Self::All),
            Some("static") => Ok(Self::Static),
            Some("animated") => Ok(Self::Animated),
            Some(_) => Err(
                r#"Invalid emote type. Specify one of "all", "static", or "animated"."#.to_string(),
            ),
        }
    }

    pub fn matches(&self, animated: bool) -> bool {
        match self {
            Self::All => true,
            Self::Static => !animated,
            Self::Animated => animated,
        }
    }
}

/// Recognises custom emote syntax in command arguments.
#[derive(Debug, Clone)]
pub struct EmoteSyntax {
    /// A whole argument that is a custom emote.
    mention_pattern: Regex,
    /// Custom emotes anywhere in a string.
    search_pattern: Regex,
}

impl Default for EmoteSyntax {
    fn default() -> Self {
        Self::new()
    }
}

impl EmoteSyntax {
    pub fn new() -> Self {
        Self {
            mention_pattern: Regex::new(r"^<(a?):(\w{2,32}):(\d{17,})>$").unwrap(),
            search_pattern: Regex::new(r"<(a?):(\w{2,32}):(\d{17,})>").unwrap(),
        }
    }

    /// Parse an argument that should be exactly one custom emote.
    pub fn parse_mention(&self, argument: &str) -> Option<EmoteMention> {
        let caps = self.mention_pattern.captures(argument).ok()??;
        Some(EmoteMention {
            animated: !caps[1].is_empty(),
            name: caps[2].to_string(),
            id: caps[3].parse().ok()?,
        })
    }

    /// Every custom emote in `text`, in order. Emotes need not be separated by spaces.
    pub fn find_mentions(&self, text: &str) -> Vec<EmoteMention> {
        self.search_pattern
            .captures_iter(text)
            .filter_map(|caps| caps.ok())
            .filter_map(|caps| {
                Some(EmoteMention {
                    animated: !caps[1].is_empty(),
                    name: caps[2].to_string(),
                    id: caps[3].parse().ok()?,
                })
            })
            .collect()
    }
}

/// Split command text into arguments. Double quotes group words.
pub fn split_args(content: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for ch in content.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

/// `<https://example.com>` suppresses Discord's embed; the brackets are not part of the URL.
pub fn strip_angle_brackets(url: &str) -> &str {
    url.strip_prefix('<')
        .and_then(|url| url.strip_suffix('>'))
        .unwrap_or(url)
}

/// What an `add` command asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub name: String,
    pub url: String,
}

/// Work out the name and image URL for `add`.
///
/// Accepts `add <emote>`, `add name <emote>`, `add name url` or
/// `add [name]` with an attachment.
pub fn parse_add_args(
    syntax: &EmoteSyntax,
    args: &[String],
    attachment: Option<(&str, &str)>,
    prefix: &str,
) -> Result<AddRequest, String> {
    if let Some((filename, url)) = attachment {
        let name = if args.is_empty() {
            emote_name_from_path(filename)
        } else {
            emote_name_from_path(&args.join(""))
        };
        return Ok(AddRequest {
            name,
            url: url.to_string(),
        });
    }

    match args {
        [] => Err("Your message had no emotes and no name!".to_string()),
        [emote] => match syntax.parse_mention(emote) {
            Some(mention) => Ok(AddRequest {
                url: mention.url(),
                name: mention.name,
            }),
            None => Err(format!(
                "Error: I expected a custom emote as the first argument, but I got something else. \
                 If you're trying to add an emote using an image URL, you need to provide a name as \
                 the first argument, like this:\n`{}add NAME_HERE URL_HERE`",
                prefix
            )),
        },
        [name, source, ..] => {
            let url = match syntax.parse_mention(source) {
                Some(mention) => mention.url(),
                None => strip_angle_brackets(source).to_string(),
            };
            Ok(AddRequest {
                name: name.clone(),
                url,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_mention() {
        let syntax = EmoteSyntax::new();

        let mention = syntax.parse_mention("<a:blobdance:400000000000000001>").unwrap();
        assert!(mention.animated);
        assert_eq!(mention.name, "blobdance");
        assert_eq!(mention.id, 400000000000000001);
        assert_eq!(
            mention.url(),
            "https://cdn.discordapp.com/emojis/400000000000000001.gif?v=1"
        );

        assert!(syntax.parse_mention("blobdance").is_none());
        assert!(syntax.parse_mention("x <:blob:400000000000000001>").is_none());
        assert!(syntax.parse_mention("<:b:400000000000000001>").is_none());
    }

    #[test]
    fn test_find_mentions_without_spaces() {
        let syntax = EmoteSyntax::new();

        let found = syntax.find_mentions("<:one:400000000000000001><a:two:400000000000000002> text");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "one");
        assert!(!found[0].animated);
        assert_eq!(found[1].name, "two");
        assert!(found[1].animated);

        assert!(syntax.find_mentions("no emotes here").is_empty());
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("a  b c"), args(&["a", "b", "c"]));
        assert_eq!(split_args(r#"old "new name" x"#), args(&["old", "new name", "x"]));
        assert_eq!(split_args(r#""""#), args(&[""]));
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(strip_angle_brackets("<https://a.b/c.png>"), "https://a.b/c.png");
        assert_eq!(strip_angle_brackets("https://a.b/c.png"), "https://a.b/c.png");
        assert_eq!(strip_angle_brackets("<https://a.b/c.png"), "<https://a.b/c.png");
    }

    #[test]
    fn test_emote_filter() {
        assert_eq!(EmoteFilter::parse(None), Ok(EmoteFilter::All));
        assert_eq!(EmoteFilter::parse(Some("Animated")), Ok(EmoteFilter::Animated));
        assert!(EmoteFilter::parse(Some("gifs")).unwrap_err().contains("Invalid emote type"));

        assert!(EmoteFilter::Static.matches(false));
        assert!(!EmoteFilter::Static.matches(true));
        assert!(EmoteFilter::All.matches(true));
    }

    #[test]
    fn test_add_single_emote() {
        let syntax = EmoteSyntax::new();
        let request =
            parse_add_args(&syntax, &args(&["<:blob:400000000000000001>"]), None, "em/").unwrap();

        assert_eq!(request.name, "blob");
        assert_eq!(
            request.url,
            "https://cdn.discordapp.com/emojis/400000000000000001.png?v=1"
        );
    }

    #[test]
    fn test_add_single_url_needs_name() {
        let syntax = EmoteSyntax::new();
        let error =
            parse_add_args(&syntax, &args(&["https://a.b/c.png"]), None, "!").unwrap_err();

        assert!(error.starts_with("Error: I expected a custom emote"));
        assert!(error.ends_with("`!add NAME_HERE URL_HERE`"));
    }

    #[test]
    fn test_add_name_and_url() {
        let syntax = EmoteSyntax::new();

        let request =
            parse_add_args(&syntax, &args(&["cat", "<https://a.b/c.png>"]), None, "em/").unwrap();
        assert_eq!(request, AddRequest { name: "cat".into(), url: "https://a.b/c.png".into() });

        let renamed = parse_add_args(
            &syntax,
            &args(&["cat", "<a:blob:400000000000000001>"]),
            None,
            "em/",
        )
        .unwrap();
        assert_eq!(renamed.name, "cat");
        assert!(renamed.url.ends_with("400000000000000001.gif?v=1"));
    }

    #[test]
    fn test_add_attachment() {
        let syntax = EmoteSyntax::new();
        let attachment = Some(("blob cat.png", "https://cdn.example/blob.png"));

        let request = parse_add_args(&syntax, &[], attachment, "em/").unwrap();
        assert_eq!(request.name, "blobcat");
        assert_eq!(request.url, "https://cdn.example/blob.png");

        let named = parse_add_args(&syntax, &args(&["kitty"]), attachment, "em/").unwrap();
        assert_eq!(named.name, "kitty");
    }

    #[test]
    fn test_add_nothing() {
        let syntax = EmoteSyntax::new();
        assert_eq!(
            parse_add_args(&syntax, &[], None, "em/").unwrap_err(),
            "Your message had no emotes and no name!"
        );
    }
}

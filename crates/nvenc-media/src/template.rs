//! Command templates for the external tool.
//!
//! A template is an untrusted, shell-looking string such as
//! `ffmpeg -i {input} -c copy {output}`. It is never handed to a shell:
//! it is split into words with POSIX quoting rules, `argv[0]` is replaced by the configured program,
//! and placeholder tokens are swapped for real paths. Anything else, including
//! `;`, `&&` or `$(...)`, reaches the tool as a literal argument.

use std::path::Path;
use thiserror::Error;

/// Token replaced by the job's input path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Token replaced by the job's output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Why a template was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("command is empty")]
    Empty,

    #[error("command has unbalanced quotes or escapes")]
    Unlexable,

    #[error("command must start with {expected}, found {found}")]
    WrongTool { expected: String, found: String },

    #[error("command must contain {{input}} as a standalone argument")]
    MissingInput,

    #[error("command must contain {{output}} as a standalone argument")]
    MissingOutput,
}

/// Validates templates and turns them into argument vectors.
///
/// Both operations are pure; neither touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEngine {
    /// Name the template's first token must match, ignoring case
    tool_name: String,
    /// Executable placed at `argv[0]` regardless of what the template said
    program: String,
}

impl TemplateEngine {
    /// Engine for `tool_name`, invoked by that same name.
    pub fn new(tool_name: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        Self {
            program: tool_name.clone(),
            tool_name,
        }
    }

    /// Invoke the tool through a specific executable, e.g. an absolute path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether `template` may be run. Fails closed.
    pub fn validate(&self, template: &str) -> bool {
        self.check(template).is_ok()
    }

    /// Like [`validate`](Self::validate), but says what is wrong.
    pub fn check(&self, template: &str) -> Result<(), TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        let tokens = split_words(template).ok_or(TemplateError::Unlexable)?;
        let (first, rest) = tokens.split_first().ok_or(TemplateError::Empty)?;

        if first.to_lowercase() != self.tool_name.to_lowercase() {
            return Err(TemplateError::WrongTool {
                expected: self.tool_name.clone(),
                found: first.clone(),
            });
        }
        if !rest.iter().any(|t| t == INPUT_PLACEHOLDER) {
            return Err(TemplateError::MissingInput);
        }
        if !rest.iter().any(|t| t == OUTPUT_PLACEHOLDER) {
            return Err(TemplateError::MissingOutput);
        }
        Ok(())
    }

    /// Substitute paths into `template`.
    ///
    /// Returns `None` if the template cannot be lexed or is empty. The first
    /// token is always replaced by [`program`](Self::program).
    pub fn build(&self, template: &str, input: &Path, output: &Path) -> Option<Vec<String>> {
        let tokens = split_words(template)?;
        let mut tokens = tokens.into_iter();
        tokens.next()?;

        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        let mut argv = Vec::with_capacity(tokens.len() + 1);
        argv.push(self.program.clone());
        argv.extend(tokens.map(|t| match t.as_str() {
            INPUT_PLACEHOLDER => input.to_string(),
            OUTPUT_PLACEHOLDER => output.to_string(),
            _ => t,
        }));
        Some(argv)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Split `line` into words the way a POSIX shell quotes them.
///
/// Single quotes are literal, double quotes honour `\"` and `\\`, and a
/// backslash outside quotes escapes the next character. No expansion happens
/// and `#` is an ordinary character, so nothing is ever dropped as a comment.
/// Returns `None` on an unterminated quote or a trailing backslash.
fn split_words(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\\' => {
                word.push(chars.next()?);
                in_word = true;
            }
            '\'' => {
                loop {
                    match chars.next()? {
                        '\'' => break,
                        c => word.push(c),
                    }
                }
                in_word = true;
            }
            '"' => {
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            c @ ('"' | '\\') => word.push(c),
                            c => {
                                word.push('\\');
                                word.push(c);
                            }
                        },
                        c => word.push(c),
                    }
                }
                in_word = true;
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Some(words)
}

/// Render an argument vector for logs, quoting where a shell would need it.
pub fn display_argv(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn engine() -> TemplateEngine {
        TemplateEngine::default()
    }

    fn paths() -> (PathBuf, PathBuf) {
        (
            PathBuf::from("/data/abc/input.mov"),
            PathBuf::from("/data/abc/output.mp4"),
        )
    }

    #[test]
    fn test_validate_accepts_well_formed_templates() {
        let e = engine();
        assert!(e.validate("ffmpeg -i {input} -c copy {output}"));
        assert!(e.validate("FFmpeg -i {input} {output}"));
        assert!(e.validate("  ffmpeg   -y -i {input} -vf 'scale=1280:-2' {output}  "));
    }

    #[test]
    fn test_validate_rejects_wrong_tool() {
        let e = engine();
        assert!(!e.validate("convert {input} {output}"));
        assert!(!e.validate("/usr/bin/ffmpeg -i {input} {output}"));
        assert!(!e.validate("ffmpeg2 -i {input} {output}"));
        assert_eq!(
            e.check("convert {input} {output}"),
            Err(TemplateError::WrongTool {
                expected: "ffmpeg".into(),
                found: "convert".into()
            })
        );
    }

    #[test]
    fn test_validate_requires_standalone_placeholders() {
        let e = engine();
        assert_eq!(e.check(""), Err(TemplateError::Empty));
        assert_eq!(e.check("   "), Err(TemplateError::Empty));
        assert_eq!(e.check("ffmpeg"), Err(TemplateError::MissingInput));
        assert_eq!(
            e.check("ffmpeg -i {input}.mov {output}"),
            Err(TemplateError::MissingInput)
        );
        assert_eq!(
            e.check("ffmpeg -i {input} out_{output}"),
            Err(TemplateError::MissingOutput)
        );
        assert_eq!(
            e.check("{input} {output}"),
            Err(TemplateError::WrongTool {
                expected: "ffmpeg".into(),
                found: "{input}".into()
            })
        );
    }

    #[test]
    fn test_validate_unbalanced_quotes_fails_closed() {
        let e = engine();
        assert_eq!(
            e.check("ffmpeg -i '{input} {output}"),
            Err(TemplateError::Unlexable)
        );
        assert!(!e.validate("ffmpeg -i \"{input} {output}"));
    }

    #[test]
    fn test_quoted_placeholder_is_still_a_token() {
        let e = engine();
        assert!(e.validate("ffmpeg -i \"{input}\" '{output}'"));
    }

    #[test]
    fn test_build_substitutes_whole_tokens_only() {
        let (input, output) = paths();
        let argv = engine()
            .build("ffmpeg -i {input} -metadata title={input} {output}", &input, &output)
            .unwrap();
        assert_eq!(
            argv,
            vec![
                "ffmpeg",
                "-i",
                "/data/abc/input.mov",
                "-metadata",
                "title={input}",
                "/data/abc/output.mp4",
            ]
        );
    }

    #[test]
    fn test_build_pins_program() {
        let (input, output) = paths();
        let e = engine().with_program("/opt/ffmpeg/bin/ffmpeg");
        for template in [
            "FFMPEG -i {input} {output}",
            "ffmpeg -i {input} {output}",
            "/bin/sh -c {input} {output}",
        ] {
            let argv = e.build(template, &input, &output).unwrap();
            assert_eq!(argv[0], "/opt/ffmpeg/bin/ffmpeg");
        }
    }

    #[test]
    fn test_build_keeps_shell_syntax_literal() {
        let (input, output) = paths();
        let template = "ffmpeg -i {input} ; rm -rf / {output}";
        assert!(engine().validate(template));

        let argv = engine().build(template, &input, &output).unwrap();
        assert_eq!(
            argv,
            vec![
                "ffmpeg",
                "-i",
                "/data/abc/input.mov",
                ";",
                "rm",
                "-rf",
                "/",
                "/data/abc/output.mp4",
            ]
        );

        let argv = engine()
            .build("ffmpeg -i {input} '$(reboot)' `id` {output}", &input, &output)
            .unwrap();
        assert!(argv.contains(&"$(reboot)".to_string()));
        assert!(argv.contains(&"`id`".to_string()));
    }

    #[test]
    fn test_build_preserves_quoted_arguments() {
        let (input, output) = paths();
        let argv = engine()
            .build(
                "ffmpeg -i {input} -vf \"drawtext=text='hi there'\" {output}",
                &input,
                &output,
            )
            .unwrap();
        assert_eq!(argv[3], "-vf");
        assert_eq!(argv[4], "drawtext=text='hi there'");
    }

    #[test]
    fn test_build_fails_on_unlexable_or_empty() {
        let (input, output) = paths();
        assert!(engine().build("ffmpeg -i '{input}", &input, &output).is_none());
        assert!(engine().build("", &input, &output).is_none());
    }

    #[test]
    fn test_display_argv_quotes_spaces() {
        let argv = vec!["ffmpeg".to_string(), "-vf".to_string(), "a b".to_string()];
        let shown = display_argv(&argv);
        assert!(shown.starts_with("ffmpeg -vf "));
        assert_eq!(split_words(&shown).unwrap(), argv);
    }

    #[test]
    fn test_hash_is_an_ordinary_character() {
        let e = engine();
        assert_eq!(e.check("ffmpeg -i {input} -metadata comment= #1 {output}"), Ok(()));
        assert!(e.validate("ffmpeg -i {input} #x {output}"));

        let (input, output) = paths();
        let argv = e
            .build("ffmpeg -i {input} {output} #x", &input, &output)
            .unwrap();
        assert_eq!(
            argv,
            vec!["ffmpeg", "-i", "/data/abc/input.mov", "/data/abc/output.mp4", "#x"]
        );

        let argv = e
            .build("ffmpeg -i {input} -vf 'drawtext=text=#1' a#b {output}", &input, &output)
            .unwrap();
        assert_eq!(argv[4], "drawtext=text=#1");
        assert_eq!(argv[5], "a#b");
        assert_eq!(argv[6], "/data/abc/output.mp4");
    }

    #[test]
    fn test_split_words_quoting() {
        assert_eq!(
            split_words(r#"a 'b c' "d \"e\" \$f" g\ h i''j"#).unwrap(),
            vec!["a", "b c", r#"d "e" \$f"#, "g h", "ij"]
        );
        assert_eq!(split_words("a '' b").unwrap(), vec!["a", "", "b"]);
        assert_eq!(split_words("  \t ").unwrap(), Vec::<String>::new());
        assert!(split_words("a 'b").is_none());
        assert!(split_words("a \"b").is_none());
        assert!(split_words("a b\\").is_none());
    }
}

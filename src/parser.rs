use crate::error::ParseError;
use crate::lexer::{self, Token, is_blank};
use std::fmt;
use std::path::PathBuf;

/// How an output redirect treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `>`: the file is truncated before the stage writes to it.
    Truncate,
    /// `>>`: output is appended to the end of the file.
    Append,
}

/// Where one standard stream of a stage is bound.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Redirect {
    /// No explicit redirect: the stream comes from the neighbouring pipe or the shell.
    #[default]
    Inherit,
    /// `< path`
    ReadFrom(PathBuf),
    /// `> path` or `>> path`
    WriteTo(PathBuf, WriteMode),
}

/// One command of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Command name as typed, before path resolution.
    pub name: String,
    /// Positional arguments, the command name excluded.
    pub args: Vec<String>,
    pub stdin: Redirect,
    pub stdout: Redirect,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Stage {
            name: name.into(),
            args: Vec::new(),
            stdin: Redirect::Inherit,
            stdout: Redirect::Inherit,
        }
    }
}

/// The stages parsed from one input line, in command order, plus the line-level flags.
///
/// `background` and `request_autocomplete` describe the whole line and are never
/// attached to an individual stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub background: bool,
    pub request_autocomplete: bool,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Whether `word` must be quoted to come back as the same single argument.
fn needs_quotes(word: &str) -> bool {
    word.is_empty()
        || word.chars().any(is_blank)
        || word.starts_with(['"', '\'', '<', '>'])
        || word == "|"
        || word == "&"
        || word.ends_with(['&', '?'])
}

fn write_word(f: &mut fmt::Formatter<'_>, word: &str) -> fmt::Result {
    if needs_quotes(word) {
        if word.contains('"') {
            write!(f, "'{}'", word)
        } else {
            write!(f, "\"{}\"", word)
        }
    } else {
        f.write_str(word)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_word(f, &self.name)?;
        for arg in &self.args {
            f.write_str(" ")?;
            write_word(f, arg)?;
        }
        if let Redirect::ReadFrom(path) = &self.stdin {
            f.write_str(" < ")?;
            write_word(f, &path.to_string_lossy())?;
        }
        if let Redirect::WriteTo(path, mode) = &self.stdout {
            f.write_str(match mode {
                WriteMode::Truncate => " > ",
                WriteMode::Append => " >> ",
            })?;
            write_word(f, &path.to_string_lossy())?;
        }
        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        if self.background {
            f.write_str(" &")?;
        }
        Ok(())
    }
}

/// Redirect operator recognized at the start of an unquoted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectOp {
    Input,
    Output(WriteMode),
}

impl RedirectOp {
    /// Splits an operator token into the operator and any target text attached to it
    /// (`>out.txt` carries `out.txt`).
    fn split(token: &Token) -> Option<(RedirectOp, &str)> {
        if token.quoted {
            return None;
        }
        let text = token.text.as_str();
        if let Some(rest) = text.strip_prefix(">>") {
            Some((RedirectOp::Output(WriteMode::Append), rest))
        } else if let Some(rest) = text.strip_prefix('>') {
            Some((RedirectOp::Output(WriteMode::Truncate), rest))
        } else {
            text.strip_prefix('<').map(|rest| (RedirectOp::Input, rest))
        }
    }
}

fn is_operator(token: &Token) -> bool {
    token.is_op("|") || RedirectOp::split(token).is_some()
}

struct PipelineBuilder<'l> {
    line: &'l str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'l> PipelineBuilder<'l> {
    fn new(line: &'l str, tokens: Vec<Token>) -> Self {
        PipelineBuilder {
            line,
            tokens,
            pos: 0,
        }
    }

    fn malformed(&self, what: &str) -> ParseError {
        ParseError::MalformedPipeline(format!("{} in `{}`", what, self.line))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: stage ('|' stage)*
    fn build_stages(mut self) -> Result<Vec<Stage>, ParseError> {
        let mut stages = Vec::new();
        if self.tokens.is_empty() {
            return Ok(stages);
        }

        loop {
            stages.push(self.parse_stage()?);
            match self.consume() {
                Some(_pipe) => {
                    if self.peek().is_none() {
                        return Err(self.malformed("`|` is not followed by a command"));
                    }
                }
                None => break,
            }
        }

        Ok(stages)
    }

    /// Parse one stage, stopping before a `|` or at the end of input.
    fn parse_stage(&mut self) -> Result<Stage, ParseError> {
        let mut name = None;
        let mut args = Vec::new();
        let mut stdin = Redirect::Inherit;
        let mut stdout = Redirect::Inherit;

        while let Some(token) = self.peek() {
            if token.is_op("|") {
                break;
            }
            let Some(token) = self.consume() else { break };

            if let Some((op, attached)) = RedirectOp::split(&token) {
                // `>>>x` or `<>x`: the operator runs into another one.
                if attached.starts_with(['<', '>']) {
                    return Err(ParseError::MalformedRedirect(token.text.clone()));
                }
                let target = if attached.is_empty() {
                    self.redirect_target(&token)?
                } else {
                    attached.to_string()
                };
                // A later redirect of the same stream replaces an earlier one.
                match op {
                    RedirectOp::Input => stdin = Redirect::ReadFrom(PathBuf::from(target)),
                    RedirectOp::Output(mode) => {
                        stdout = Redirect::WriteTo(PathBuf::from(target), mode)
                    }
                }
            } else if token.is_op("&") {
                continue;
            } else if name.is_none() {
                name = Some(token.text);
            } else {
                args.push(token.text);
            }
        }

        let name = match name {
            Some(name) if !name.is_empty() => name,
            Some(_) => return Err(self.malformed("empty command name")),
            None if self.peek().is_some() => {
                return Err(self.malformed("`|` is not preceded by a command"));
            }
            None => return Err(self.malformed("redirect without a command")),
        };

        Ok(Stage {
            name,
            args,
            stdin,
            stdout,
        })
    }

    /// Target of a detached redirect operator: the next token, which must be a word.
    fn redirect_target(&mut self, op: &Token) -> Result<String, ParseError> {
        let has_target = self.peek().is_some_and(|next| !is_operator(next));
        match self.consume() {
            Some(target) if has_target => Ok(target.text),
            _ => Err(ParseError::MalformedRedirect(op.text.clone())),
        }
    }
}

/// Parses one input line into a [`Pipeline`].
///
/// The background (`&`) and autocomplete (`?`) markers are read from the last
/// non-blank character of the whole line before anything is split into stages, and
/// are removed from the text that gets tokenized. A blank line gives an empty
/// pipeline.
pub fn parse_line(line: &str) -> Result<Pipeline, ParseError> {
    let mut text = line.trim_matches(is_blank);
    let mut background = false;
    let mut request_autocomplete = false;

    if let Some(rest) = text.strip_suffix('?') {
        request_autocomplete = true;
        text = rest;
    } else if let Some(rest) = text.strip_suffix('&') {
        background = true;
        text = rest;
    }

    let tokens = lexer::split_into_tokens(text)?;
    let stages = PipelineBuilder::new(text, tokens).build_stages()?;

    Ok(Pipeline {
        stages,
        background,
        request_autocomplete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, args: &[&str]) -> Stage {
        let mut stage = Stage::new(name);
        stage.args = args.iter().map(|a| a.to_string()).collect();
        stage
    }

    #[test]
    fn test_single_command_is_one_stage() {
        let pipeline = parse_line("ls -l /tmp").unwrap();
        assert_eq!(pipeline.stages, vec![stage("ls", &["-l", "/tmp"])]);
        assert!(!pipeline.background);
        assert!(!pipeline.request_autocomplete);
    }

    #[test]
    fn test_blank_line_is_empty_pipeline() {
        let pipeline = parse_line("   ").unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline, Pipeline::default());
    }

    #[test]
    fn test_pipes_give_stages_in_textual_order() {
        let pipeline = parse_line("cat f | grep x | sort -r | uniq").unwrap();
        let names: Vec<&str> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cat", "grep", "sort", "uniq"]);
        assert_eq!(pipeline.stages[2].args, vec!["-r"]);
    }

    #[test]
    fn test_output_redirect_truncate() {
        let pipeline = parse_line("cmd > out.txt").unwrap();
        assert_eq!(
            pipeline.stages[0].stdout,
            Redirect::WriteTo(PathBuf::from("out.txt"), WriteMode::Truncate)
        );
        assert!(pipeline.stages[0].args.is_empty());
    }

    #[test]
    fn test_output_redirect_append() {
        let pipeline = parse_line("cmd >> out.txt").unwrap();
        assert_eq!(
            pipeline.stages[0].stdout,
            Redirect::WriteTo(PathBuf::from("out.txt"), WriteMode::Append)
        );
    }

    #[test]
    fn test_input_redirect() {
        let pipeline = parse_line("cmd < in.txt").unwrap();
        assert_eq!(
            pipeline.stages[0].stdin,
            Redirect::ReadFrom(PathBuf::from("in.txt"))
        );
        assert_eq!(pipeline.stages[0].stdout, Redirect::Inherit);
    }

    #[test]
    fn test_attached_redirect_targets() {
        let pipeline = parse_line("sort <in.txt >>log.txt").unwrap();
        let sort = &pipeline.stages[0];
        assert_eq!(sort.stdin, Redirect::ReadFrom(PathBuf::from("in.txt")));
        assert_eq!(
            sort.stdout,
            Redirect::WriteTo(PathBuf::from("log.txt"), WriteMode::Append)
        );
        assert!(sort.args.is_empty());
    }

    #[test]
    fn test_last_redirect_of_a_direction_wins() {
        let pipeline = parse_line("cmd > a.txt arg >> b.txt").unwrap();
        let cmd = &pipeline.stages[0];
        assert_eq!(
            cmd.stdout,
            Redirect::WriteTo(PathBuf::from("b.txt"), WriteMode::Append)
        );
        assert_eq!(cmd.args, vec!["arg"]);
    }

    #[test]
    fn test_redirects_bind_to_their_own_stage() {
        let pipeline = parse_line("sort < in.txt | uniq > out.txt").unwrap();
        assert_eq!(
            pipeline.stages[0].stdin,
            Redirect::ReadFrom(PathBuf::from("in.txt"))
        );
        assert_eq!(pipeline.stages[0].stdout, Redirect::Inherit);
        assert_eq!(pipeline.stages[1].stdin, Redirect::Inherit);
        assert_eq!(
            pipeline.stages[1].stdout,
            Redirect::WriteTo(PathBuf::from("out.txt"), WriteMode::Truncate)
        );
    }

    #[test]
    fn test_quoted_argument_stays_whole() {
        let pipeline = parse_line("echo \"a b\"").unwrap();
        assert_eq!(pipeline.stages[0].args, vec!["a b"]);
    }

    #[test]
    fn test_quoted_operators_are_arguments() {
        let pipeline = parse_line("echo '|' \">\" '<'").unwrap();
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].args, vec!["|", ">", "<"]);
    }

    #[test]
    fn test_background_belongs_to_the_pipeline() {
        let pipeline = parse_line("cmd1 | cmd2 &").unwrap();
        assert!(pipeline.background);
        assert_eq!(pipeline.stages, vec![stage("cmd1", &[]), stage("cmd2", &[])]);
    }

    #[test]
    fn test_background_marker_attached_to_last_word() {
        let pipeline = parse_line("sleep 5&").unwrap();
        assert!(pipeline.background);
        assert_eq!(pipeline.stages, vec![stage("sleep", &["5"])]);
    }

    #[test]
    fn test_autocomplete_marker() {
        let pipeline = parse_line("git sta?").unwrap();
        assert!(pipeline.request_autocomplete);
        assert!(!pipeline.background);
        assert_eq!(pipeline.stages, vec![stage("git", &["sta"])]);
    }

    #[test]
    fn test_inner_ampersand_is_ignored() {
        let pipeline = parse_line("a & b").unwrap();
        assert!(!pipeline.background);
        assert_eq!(pipeline.stages, vec![stage("a", &["b"])]);
    }

    #[test]
    fn test_trailing_pipe_is_malformed() {
        assert!(matches!(
            parse_line("ls |"),
            Err(ParseError::MalformedPipeline(_))
        ));
        assert!(matches!(
            parse_line("ls | &"),
            Err(ParseError::MalformedPipeline(_))
        ));
    }

    #[test]
    fn test_leading_and_double_pipes_are_malformed() {
        assert!(matches!(
            parse_line("| wc"),
            Err(ParseError::MalformedPipeline(_))
        ));
        assert!(matches!(
            parse_line("ls | | wc"),
            Err(ParseError::MalformedPipeline(_))
        ));
    }

    #[test]
    fn test_redirect_without_target_is_malformed() {
        assert_eq!(
            parse_line("cmd >"),
            Err(ParseError::MalformedRedirect(">".to_string()))
        );
        assert_eq!(
            parse_line("cmd < | wc"),
            Err(ParseError::MalformedRedirect("<".to_string()))
        );
    }

    #[test]
    fn test_operator_run_into_redirect_is_malformed() {
        assert_eq!(
            parse_line("cmd >>>x"),
            Err(ParseError::MalformedRedirect(">>>x".to_string()))
        );
        assert_eq!(
            parse_line("cmd <>x"),
            Err(ParseError::MalformedRedirect("<>x".to_string()))
        );
    }

    #[test]
    fn test_pipeline_errors_name_the_line() {
        let Err(ParseError::MalformedPipeline(message)) = parse_line("ls | | wc") else {
            panic!("expected MalformedPipeline");
        };
        assert!(message.contains("ls | | wc"), "{}", message);

        let Err(ParseError::MalformedPipeline(message)) = parse_line("sort |") else {
            panic!("expected MalformedPipeline");
        };
        assert!(message.contains("sort |"), "{}", message);
    }

    #[test]
    fn test_redirect_only_is_malformed() {
        assert!(matches!(
            parse_line("> out.txt"),
            Err(ParseError::MalformedPipeline(_))
        ));
    }

    #[test]
    fn test_unterminated_quote_is_reported() {
        assert!(matches!(
            parse_line("echo 'oops"),
            Err(ParseError::MalformedQuote(_))
        ));
    }

    #[test]
    fn test_parsing_is_repeatable() {
        let line = "grep -i \"x y\" < in.txt | sort >> out.txt &";
        assert_eq!(parse_line(line).unwrap(), parse_line(line).unwrap());
    }

    #[test]
    fn test_display_reproduces_the_line() {
        let line = "grep \"x y\" < in.txt | sort >> out.txt &";
        let pipeline = parse_line(line).unwrap();
        assert_eq!(pipeline.to_string(), line);
        assert_eq!(parse_line(&pipeline.to_string()).unwrap(), pipeline);
    }

    #[test]
    fn test_display_quotes_words_that_look_like_syntax() {
        let pipeline = parse_line(r#"echo '|' '>x' "'abc" '<' "a&" "why?" "&" &"#).unwrap();
        assert_eq!(
            pipeline.stages[0].args,
            vec!["|", ">x", "'abc", "<", "a&", "why?", "&"]
        );
        let shown = pipeline.to_string();
        assert_eq!(shown, r#"echo "|" ">x" "'abc" "<" "a&" "why?" "&" &"#);
        assert_eq!(parse_line(&shown).unwrap(), pipeline);
    }
}

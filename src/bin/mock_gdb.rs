//! Mock GDB binary for integration testing
//!
//! Speaks enough of the MI2 protocol on stdin/stdout to drive a debug
//! session without a real GDB or target. Behaviour:
//!
//! - `-target-select` halts the target at `_start`
//! - commands that need a stopped target fail with GDB's "running" error
//!   while the target runs
//! - line breakpoints resolve to `0x80000100 + (line / 2) * 4`, so lines
//!   20 and 21 share an address
//! - `-exec-continue` keeps running until interrupted, unless started with
//!   `--stop-at-breakpoints`, then it halts at the next breakpoint below the
//!   current line whose condition is not `0`
//! - stepping increments the local `count` and drops every variable object
//! - `--exit-on-connect` makes GDB quit right after connecting

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use gdbmi::mi::cstring;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut state = MockState {
        stop_at_breakpoints: args.iter().any(|a| a == "--stop-at-breakpoints"),
        exit_on_connect: args.iter().any(|a| a == "--exit-on-connect"),
        ..MockState::default()
    };

    eprintln!("mock gdb: loading {}", args.first().map(String::as_str).unwrap_or("?"));

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "=thread-group-added,id=\"i1\"").ok();
    writeln!(out, "(gdb)").ok();
    out.flush().ok();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let token: String = line.chars().take_while(char::is_ascii_digit).collect();
        let Some(command) = line[token.len()..].strip_prefix('-') else {
            writeln!(out, "&\"mock gdb only speaks MI\\n\"").ok();
            writeln!(out, "{}^error,msg=\"Undefined command\"", token).ok();
            continue;
        };

        let (operation, rest) = command.split_once(' ').unwrap_or((command, ""));
        let words = split_args(rest);
        let exit = state.handle(&mut out, &token, operation, &words);
        writeln!(out, "(gdb)").ok();
        out.flush().ok();
        if exit {
            break;
        }
    }
}

/// Split MI arguments, decoding C-string quoted ones
fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut body = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        body.push('\\');
                        if let Some(next) = chars.next() {
                            body.push(next);
                        }
                    }
                    '"' => break,
                    other => body.push(other),
                }
            }
            args.push(cstring::decode(&body));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            args.push(word);
        }
    }
    args
}

/// Value of `--flag value` in an argument list
fn flag<'a>(words: &'a [String], name: &str) -> Option<&'a str> {
    words
        .iter()
        .position(|w| w == name)
        .and_then(|i| words.get(i + 1))
        .map(String::as_str)
}

/// Arguments left after removing `--flag value` pairs
fn positional(words: &[String], flags: &[&str]) -> Vec<String> {
    let mut result = Vec::new();
    let mut skip = false;
    for word in words {
        if skip {
            skip = false;
        } else if flags.contains(&word.as_str()) {
            skip = true;
        } else {
            result.push(word.clone());
        }
    }
    result
}

fn quote(s: &str) -> String {
    cstring::encode(s)
}

struct MockBreakpoint {
    id: u32,
    kind: &'static str,
    file: String,
    line: u32,
    func: String,
    address: u64,
    condition: Option<String>,
}

#[derive(Clone)]
struct MockVar {
    exp: String,
    value: String,
    type_name: String,
    children: Vec<(String, String)>,
}

struct MockState {
    connected: bool,
    running: bool,
    line: u32,
    file: String,
    next_breakpoint: u32,
    breakpoints: Vec<MockBreakpoint>,
    locals: BTreeMap<String, MockVar>,
    varobjs: BTreeMap<String, MockVar>,
    stop_at_breakpoints: bool,
    exit_on_connect: bool,
}

impl Default for MockState {
    fn default() -> Self {
        let mut locals = BTreeMap::new();
        locals.insert(
            "count".to_string(),
            MockVar {
                exp: "count".to_string(),
                value: "3".to_string(),
                type_name: "int".to_string(),
                children: Vec::new(),
            },
        );
        locals.insert(
            "cfg".to_string(),
            MockVar {
                exp: "cfg".to_string(),
                value: "{...}".to_string(),
                type_name: "struct config".to_string(),
                children: vec![
                    ("baud".to_string(), "115200".to_string()),
                    ("mode".to_string(), "1".to_string()),
                ],
            },
        );
        Self {
            connected: false,
            running: false,
            line: 10,
            file: "main.c".to_string(),
            next_breakpoint: 1,
            breakpoints: Vec::new(),
            locals,
            varobjs: BTreeMap::new(),
            stop_at_breakpoints: false,
            exit_on_connect: false,
        }
    }
}

const BUSY: &str = "Cannot execute this command while the target is running.\\nUse the \\\"interrupt\\\" command to stop the target\\nand then try again.";

impl MockState {
    /// Handle one command, returns true when GDB should exit
    fn handle<W: Write>(&mut self, out: &mut W, token: &str, operation: &str, words: &[String]) -> bool {
        let needs_stopped = matches!(
            operation,
            "target-download"
                | "break-insert"
                | "dprintf-insert"
                | "break-delete"
                | "break-condition"
                | "thread-info"
                | "stack-list-frames"
                | "stack-list-variables"
                | "var-create"
                | "var-update"
                | "var-list-children"
                | "var-assign"
                | "data-evaluate-expression"
                | "data-read-memory-bytes"
                | "interpreter-exec"
                | "gdb-set"
        );
        if needs_stopped && self.running {
            writeln!(out, "{}^error,msg=\"{}\"", token, BUSY).ok();
            return false;
        }

        match operation {
            "gdb-set" | "gdb-show" | "break-condition" | "break-delete" => {
                if operation == "break-condition" {
                    let id: u32 = words.first().and_then(|w| w.parse().ok()).unwrap_or(0);
                    let condition = words.get(1..).map(|c| c.join(" ")).filter(|c| !c.is_empty());
                    match self.breakpoints.iter_mut().find(|b| b.id == id) {
                        Some(bp) => bp.condition = condition,
                        None => {
                            writeln!(out, "{}^error,msg=\"No breakpoint number {}.\"", token, id).ok();
                            return false;
                        }
                    }
                }
                if operation == "break-delete" {
                    let ids: Vec<u32> = words.iter().filter_map(|w| w.parse().ok()).collect();
                    self.breakpoints.retain(|b| !ids.contains(&b.id));
                }
                writeln!(out, "{}^done", token).ok();
            }
            "gdb-version" => {
                writeln!(out, "~\"GNU gdb (mock) 12.1\\n\"").ok();
                writeln!(out, "{}^done", token).ok();
            }
            "target-select" => {
                self.connected = true;
                writeln!(out, "=thread-group-started,id=\"i1\",pid=\"42000\"").ok();
                writeln!(out, "=thread-created,id=\"1\",group-id=\"i1\"").ok();
                writeln!(out, "~\"0x80000000 in _start ()\\n\"").ok();
                writeln!(
                    out,
                    "*stopped,frame={{addr=\"0x80000000\",func=\"_start\",args=[]}},thread-id=\"1\",stopped-threads=\"all\""
                )
                .ok();
                writeln!(out, "{}^connected", token).ok();
                if self.exit_on_connect {
                    writeln!(out, "=thread-exited,id=\"1\",group-id=\"i1\"").ok();
                    writeln!(out, "{}", "&\"Remote connection closed\\n\"").ok();
                    return true;
                }
            }
            "target-download" => {
                if !self.connected {
                    writeln!(out, "{}^error,msg=\"You can't do that when your target is `exec'\"", token).ok();
                    return false;
                }
                let sections = [(".text", 2048u64), (".data", 1024u64)];
                let total: u64 = sections.iter().map(|(_, size)| size).sum();
                let mut sent = 0;
                for (name, size) in sections {
                    writeln!(out, "{}+download,{{section=\"{}\",section-size=\"{}\",total-size=\"{}\"}}", token, name, size, total).ok();
                    for chunk in [size / 2, size] {
                        writeln!(
                            out,
                            "{}+download,{{section=\"{}\",section-sent=\"{}\",section-size=\"{}\",total-sent=\"{}\",total-size=\"{}\"}}",
                            token,
                            name,
                            chunk,
                            size,
                            sent + chunk,
                            total
                        )
                        .ok();
                    }
                    sent += size;
                }
                writeln!(
                    out,
                    "{}^done,address=\"0x80000000\",load-size=\"{}\",transfer-rate=\"8192\",write-rate=\"1024\"",
                    token, total
                )
                .ok();
            }
            "break-insert" | "dprintf-insert" => self.insert_breakpoint(out, token, operation, words),
            "exec-continue" => {
                writeln!(out, "{}^running", token).ok();
                writeln!(out, "*running,thread-id=\"all\"").ok();
                self.running = true;
                if self.stop_at_breakpoints {
                    let hit = self
                        .breakpoints
                        .iter()
                        .filter(|b| b.kind == "breakpoint" && b.line > self.line)
                        .filter(|b| b.condition.as_deref() != Some("0"))
                        .min_by_key(|b| b.line)
                        .map(|b| (b.id, b.line, b.file.clone(), b.func.clone(), b.address));
                    if let Some((id, line, file, func, address)) = hit {
                        self.running = false;
                        self.line = line;
                        self.file = file.clone();
                        writeln!(
                            out,
                            "*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"{}\",frame={{addr=\"{:#x}\",func=\"{}\",args=[],file={},fullname={},line=\"{}\"}},thread-id=\"1\",stopped-threads=\"all\"",
                            id,
                            address,
                            func,
                            quote(&file),
                            quote(&format!("/src/{}", file)),
                            line
                        )
                        .ok();
                    }
                }
            }
            "exec-interrupt" => {
                if !self.running {
                    writeln!(out, "{}^error,msg=\"The program is not being run.\"", token).ok();
                    return false;
                }
                writeln!(out, "{}^done", token).ok();
                self.running = false;
                writeln!(
                    out,
                    "*stopped,reason=\"signal-received\",signal-name=\"SIGINT\",signal-meaning=\"Interrupt\",frame={},thread-id=\"1\",stopped-threads=\"all\"",
                    self.frame(0)
                )
                .ok();
            }
            "exec-next" | "exec-step" | "exec-finish" => {
                if self.running {
                    writeln!(out, "{}^error,msg=\"{}\"", token, BUSY).ok();
                    return false;
                }
                writeln!(out, "{}^running", token).ok();
                writeln!(out, "*running,thread-id=\"1\"").ok();
                self.line += 1;
                self.varobjs.clear();
                if let Some(count) = self.locals.get_mut("count") {
                    if let Ok(n) = count.value.parse::<i64>() {
                        count.value = (n + 1).to_string();
                    }
                }
                let reason = if operation == "exec-finish" {
                    "function-finished"
                } else {
                    "end-stepping-range"
                };
                writeln!(
                    out,
                    "*stopped,reason=\"{}\",frame={},thread-id=\"1\",stopped-threads=\"all\"",
                    reason,
                    self.frame(0)
                )
                .ok();
            }
            "thread-info" => {
                writeln!(
                    out,
                    "{}^done,threads=[{{id=\"1\",target-id=\"Thread 1\",name=\"main\",frame={},state=\"stopped\"}}],current-thread-id=\"1\"",
                    token,
                    self.frame(0)
                )
                .ok();
            }
            "stack-list-frames" => {
                writeln!(
                    out,
                    "{}^done,stack=[frame={},frame={{level=\"1\",addr=\"0x80000010\",func=\"_start\",from=\"crt0.o\"}}]",
                    token,
                    self.frame(0)
                )
                .ok();
            }
            "stack-list-variables" => {
                let vars: Vec<String> = self
                    .locals
                    .iter()
                    .map(|(name, var)| {
                        if var.children.is_empty() {
                            format!("{{name=\"{}\",type=\"{}\",value=\"{}\"}}", name, var.type_name, var.value)
                        } else {
                            format!("{{name=\"{}\",type=\"{}\"}}", name, var.type_name)
                        }
                    })
                    .collect();
                writeln!(out, "{}^done,variables=[{}]", token, vars.join(",")).ok();
            }
            "var-create" => {
                let args = positional(words, &["--thread", "--frame"]);
                let (Some(name), Some(expression)) = (args.first(), args.get(2)) else {
                    writeln!(out, "{}^error,msg=\"-var-create: Usage: NAME FRAME EXPRESSION.\"", token).ok();
                    return false;
                };
                let Some(var) = self.locals.get(expression).cloned() else {
                    writeln!(out, "{}^error,msg=\"-var-create: unable to create variable object\"", token).ok();
                    return false;
                };
                writeln!(
                    out,
                    "{}^done,name={},numchild=\"{}\",value={},type={},thread-id=\"1\",has_more=\"0\"",
                    token,
                    quote(name),
                    var.children.len(),
                    quote(&var.value),
                    quote(&var.type_name)
                )
                .ok();
                self.varobjs.insert(name.clone(), var);
            }
            "var-update" => {
                let name = words.last().cloned().unwrap_or_default();
                let Some(var) = self.varobjs.get(&name) else {
                    writeln!(out, "{}^error,msg=\"Variable object not found\"", token).ok();
                    return false;
                };
                let current = self.locals.get(&var.exp).map(|v| v.value.clone()).unwrap_or_default();
                writeln!(
                    out,
                    "{}^done,changelist=[{{name={},value={},in_scope=\"true\",type_changed=\"false\",has_more=\"0\"}}]",
                    token,
                    quote(&name),
                    quote(&current)
                )
                .ok();
            }
            "var-list-children" => {
                let name = words.last().cloned().unwrap_or_default();
                let Some(var) = self.varobjs.get(&name) else {
                    writeln!(out, "{}^error,msg=\"Variable object not found\"", token).ok();
                    return false;
                };
                let children: Vec<String> = var
                    .children
                    .iter()
                    .map(|(exp, value)| {
                        format!(
                            "child={{name={},exp={},numchild=\"0\",value={},type=\"int\",thread-id=\"1\"}}",
                            quote(&format!("{}.{}", name, exp)),
                            quote(exp),
                            quote(value)
                        )
                    })
                    .collect();
                writeln!(
                    out,
                    "{}^done,numchild=\"{}\",children=[{}],has_more=\"0\"",
                    token,
                    children.len(),
                    children.join(",")
                )
                .ok();
            }
            "var-assign" => {
                let (Some(name), Some(value)) = (words.first(), words.get(1)) else {
                    writeln!(out, "{}^error,msg=\"-var-assign: Usage: NAME EXPRESSION.\"", token).ok();
                    return false;
                };
                let exp = self.varobjs.get(name).map(|v| v.exp.clone());
                match exp {
                    Some(exp) => {
                        if let Some(local) = self.locals.get_mut(&exp) {
                            local.value = value.clone();
                        }
                        writeln!(out, "{}^done,value={}", token, quote(value)).ok();
                    }
                    None => {
                        writeln!(out, "{}^error,msg=\"Variable object not found\"", token).ok();
                    }
                }
            }
            "data-evaluate-expression" => {
                let args = positional(words, &["--thread", "--frame"]);
                let expression = args.join(" ");
                let value = match self.locals.get(&expression) {
                    Some(var) => Some(var.value.clone()),
                    None => expression.parse::<i64>().ok().map(|n| n.to_string()),
                };
                match value {
                    Some(value) => writeln!(out, "{}^done,value={}", token, quote(&value)).ok(),
                    None => writeln!(
                        out,
                        "{}^error,msg={}",
                        token,
                        quote(&format!("No symbol \"{}\" in current context.", expression))
                    )
                    .ok(),
                };
            }
            "data-read-memory-bytes" => {
                let address = words
                    .first()
                    .and_then(|a| u64::from_str_radix(a.trim_start_matches("0x"), 16).ok())
                    .unwrap_or(0);
                let length: u64 = words.get(1).and_then(|l| l.parse().ok()).unwrap_or(0);
                let contents: String = (0..length)
                    .map(|i| format!("{:02x}", (address + i) & 0xff))
                    .collect();
                writeln!(
                    out,
                    "{}^done,memory=[{{begin=\"{:#x}\",offset=\"0x0\",end=\"{:#x}\",contents=\"{}\"}}]",
                    token,
                    address,
                    address + length,
                    contents
                )
                .ok();
            }
            "interpreter-exec" => {
                let args = positional(words, &["--thread", "--frame"]);
                let text = args.get(1).cloned().unwrap_or_default();
                writeln!(out, "~{}", quote(&format!("mock: {}\n", text))).ok();
                writeln!(out, "{}^done", token).ok();
            }
            "target-detach" => {
                self.connected = false;
                self.running = false;
                writeln!(out, "=thread-exited,id=\"1\",group-id=\"i1\"").ok();
                writeln!(out, "=thread-group-exited,id=\"i1\"").ok();
                writeln!(out, "{}^done", token).ok();
            }
            "gdb-exit" => {
                writeln!(out, "{}^exit", token).ok();
                return true;
            }
            other => {
                writeln!(
                    out,
                    "{}^error,msg=\"Undefined MI command: {}\",code=\"undefined-command\"",
                    token, other
                )
                .ok();
            }
        }
        false
    }

    fn insert_breakpoint<W: Write>(&mut self, out: &mut W, token: &str, operation: &str, words: &[String]) {
        let condition = flag(words, "-c").map(str::to_string);
        let kind = if operation == "dprintf-insert" { "dprintf" } else { "breakpoint" };

        let (file, line, func, address) = if let Some(function) = flag(words, "--function") {
            (self.file.clone(), 1, function.to_string(), 0x8000_0400u64)
        } else {
            let file = flag(words, "--source").unwrap_or_default().to_string();
            let line: u32 = flag(words, "--line").and_then(|l| l.parse().ok()).unwrap_or(0);
            if file.contains("missing") {
                writeln!(out, "{}^error,msg={}", token, quote(&format!("No source file named {}.", file))).ok();
                return;
            }
            (file, line, "main".to_string(), 0x8000_0100 + u64::from(line / 2) * 4)
        };

        let id = self.next_breakpoint;
        self.next_breakpoint += 1;
        writeln!(
            out,
            "{}^done,bkpt={{number=\"{}\",type=\"{}\",disp=\"keep\",enabled=\"y\",addr=\"{:#x}\",func=\"{}\",file={},fullname={},line=\"{}\",{}times=\"0\"}}",
            token,
            id,
            kind,
            address,
            func,
            quote(&file),
            quote(&format!("/src/{}", file)),
            line,
            condition
                .as_ref()
                .map(|c| format!("cond={},", quote(c)))
                .unwrap_or_default()
        )
        .ok();
        self.breakpoints.push(MockBreakpoint {
            id,
            kind,
            file,
            line,
            func,
            address,
            condition,
        });
    }

    fn frame(&self, level: u32) -> String {
        format!(
            "{{level=\"{}\",addr=\"{:#x}\",func=\"main\",args=[],file={},fullname={},line=\"{}\"}}",
            level,
            0x8000_0100 + u64::from(self.line / 2) * 4,
            quote(&self.file),
            quote(&format!("/src/{}", self.file)),
            self.line
        )
    }
}

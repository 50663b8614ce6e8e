// Lexical analyzer for Lua 5.1 source text

use crate::gc::StringId;
use crate::lua_value::number::str2number;
use crate::lua_vm::LuaVM;
use crate::lua_vm::debug::chunk_id;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LuaTokenKind {
    // reserved words
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // multi-character symbols
    Concat,
    Dots,
    Eq,
    Ge,
    Le,
    Ne,
    Number(f64),
    Name(StringId),
    String(StringId),
    Eos,
    /// Single-character token
    Char(u8),
}

const RESERVED: [(&str, LuaTokenKind); 21] = [
    ("and", LuaTokenKind::And),
    ("break", LuaTokenKind::Break),
    ("do", LuaTokenKind::Do),
    ("else", LuaTokenKind::Else),
    ("elseif", LuaTokenKind::Elseif),
    ("end", LuaTokenKind::End),
    ("false", LuaTokenKind::False),
    ("for", LuaTokenKind::For),
    ("function", LuaTokenKind::Function),
    ("if", LuaTokenKind::If),
    ("in", LuaTokenKind::In),
    ("local", LuaTokenKind::Local),
    ("nil", LuaTokenKind::Nil),
    ("not", LuaTokenKind::Not),
    ("or", LuaTokenKind::Or),
    ("repeat", LuaTokenKind::Repeat),
    ("return", LuaTokenKind::Return),
    ("then", LuaTokenKind::Then),
    ("true", LuaTokenKind::True),
    ("until", LuaTokenKind::Until),
    ("while", LuaTokenKind::While),
];

impl LuaTokenKind {
    /// Display form used in "'x' expected" messages
    pub fn text(self) -> String {
        match self {
            LuaTokenKind::Concat => "..".to_string(),
            LuaTokenKind::Dots => "...".to_string(),
            LuaTokenKind::Eq => "==".to_string(),
            LuaTokenKind::Ge => ">=".to_string(),
            LuaTokenKind::Le => "<=".to_string(),
            LuaTokenKind::Ne => "~=".to_string(),
            LuaTokenKind::Number(_) => "<number>".to_string(),
            LuaTokenKind::Name(_) => "<name>".to_string(),
            LuaTokenKind::String(_) => "<string>".to_string(),
            LuaTokenKind::Eos => "<eof>".to_string(),
            LuaTokenKind::Char(c) => {
                if c.is_ascii_control() {
                    format!("char({})", c)
                } else {
                    (c as char).to_string()
                }
            }
            reserved => RESERVED
                .iter()
                .find(|(_, t)| *t == reserved)
                .map(|(s, _)| s.to_string())
                .unwrap_or_default(),
        }
    }

    /// Same token kind, ignoring the semantic payload
    pub fn same_kind(self, other: LuaTokenKind) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
            && match (self, other) {
                (LuaTokenKind::Char(a), LuaTokenKind::Char(b)) => a == b,
                _ => true,
            }
    }
}

const EOZ: i32 = -1;

pub struct LuaLexer<'a> {
    src: &'a [u8],
    pos: usize,
    current: i32,
    pub line: u32,
    /// Line of the last token consumed
    pub last_line: u32,
    pub token: LuaTokenKind,
    /// Look-ahead token with its text
    lookahead: Option<(LuaTokenKind, Vec<u8>)>,
    /// Text of the token being read, for error messages
    buf: Vec<u8>,
    pub source: String,
    /// Reserved-word strings, fixed in the pool
    reserved: Vec<(StringId, LuaTokenKind)>,
}

impl<'a> LuaLexer<'a> {
    pub fn new(vm: &mut LuaVM, src: &'a [u8], source: &str) -> Self {
        let reserved = RESERVED
            .iter()
            .map(|(name, kind)| {
                let id = vm.intern(name.as_bytes());
                vm.pool[id].header.set_fixed();
                (id, *kind)
            })
            .collect();
        let mut lexer = LuaLexer {
            src,
            pos: 0,
            current: EOZ,
            line: 1,
            last_line: 1,
            token: LuaTokenKind::Eos,
            lookahead: None,
            buf: Vec::new(),
            source: source.to_string(),
            reserved,
        };
        lexer.next_char();
        if lexer.current == b'#' as i32 {
            // skip a first line starting with '#' (shebang)
            while lexer.current != EOZ && !lexer.curr_is_newline() {
                lexer.next_char();
            }
        }
        lexer
    }

    #[inline]
    fn next_char(&mut self) {
        self.current = match self.src.get(self.pos) {
            Some(&c) => {
                self.pos += 1;
                c as i32
            }
            None => EOZ,
        };
    }

    #[inline]
    fn curr_is_newline(&self) -> bool {
        self.current == b'\n' as i32 || self.current == b'\r' as i32
    }

    #[inline]
    fn save(&mut self, c: i32) {
        self.buf.push(c as u8);
    }

    #[inline]
    fn save_and_next(&mut self) {
        self.save(self.current);
        self.next_char();
    }

    fn check_next(&mut self, set: &[u8]) -> bool {
        if self.current == EOZ || !set.contains(&(self.current as u8)) {
            return false;
        }
        self.save_and_next();
        true
    }

    fn current_is(&self, c: u8) -> bool {
        self.current == c as i32
    }

    fn current_digit(&self) -> bool {
        self.current != EOZ && (self.current as u8).is_ascii_digit()
    }

    fn inc_line(&mut self) -> Result<(), String> {
        let old = self.current;
        self.next_char();
        if self.curr_is_newline() && self.current != old {
            self.next_char();
        }
        self.line += 1;
        if self.line >= i32::MAX as u32 {
            return Err(self.error_at("chunk has too many lines", None));
        }
        Ok(())
    }

    fn token_text(&self, token: LuaTokenKind) -> String {
        match token {
            LuaTokenKind::Name(_) | LuaTokenKind::String(_) | LuaTokenKind::Number(_) => {
                String::from_utf8_lossy(&self.buf).into_owned()
            }
            other => other.text(),
        }
    }

    /// `chunk:line: msg near 'token'`
    pub fn error_at(&self, msg: &str, token: Option<LuaTokenKind>) -> String {
        let mut text = format!("{}:{}: {}", chunk_id(&self.source), self.line, msg);
        if let Some(token) = token {
            text.push_str(&format!(" near '{}'", self.token_text(token)));
        }
        text
    }

    /// Error about the token being read, quoting the text seen so far
    fn error_near_buffer(&self, msg: &str) -> String {
        format!(
            "{}:{}: {} near '{}'",
            chunk_id(&self.source),
            self.line,
            msg,
            String::from_utf8_lossy(&self.buf)
        )
    }

    pub fn syntax_error(&self, msg: &str) -> String {
        self.error_at(msg, Some(self.token))
    }

    /// Advance to the next token
    pub fn next(&mut self, vm: &mut LuaVM) -> Result<(), String> {
        self.last_line = self.line;
        self.token = match self.lookahead.take() {
            Some((t, text)) => {
                self.buf = text;
                t
            }
            None => self.lex(vm)?,
        };
        Ok(())
    }

    pub fn lookahead(&mut self, vm: &mut LuaVM) -> Result<LuaTokenKind, String> {
        if let Some((t, _)) = &self.lookahead {
            return Ok(*t);
        }
        // the current token keeps its own text
        let saved = std::mem::take(&mut self.buf);
        let t = self.lex(vm)?;
        let text = std::mem::replace(&mut self.buf, saved);
        self.lookahead = Some((t, text));
        Ok(t)
    }

    fn read_numeral(&mut self) -> Result<LuaTokenKind, String> {
        loop {
            self.save_and_next();
            if !(self.current_digit() || self.current_is(b'.')) {
                break;
            }
        }
        if self.check_next(b"Ee") {
            self.check_next(b"+-");
        }
        while self.current != EOZ
            && ((self.current as u8).is_ascii_alphanumeric() || self.current_is(b'_'))
        {
            self.save_and_next();
        }
        match str2number(&self.buf) {
            Some(n) => Ok(LuaTokenKind::Number(n)),
            None => Err(self.error_near_buffer("malformed number")),
        }
    }

    /// Count the `=` of a long bracket. Negative when the bracket is not
    /// well formed.
    fn skip_sep(&mut self) -> i32 {
        let s = self.current;
        let mut count = 0;
        self.save_and_next();
        while self.current_is(b'=') {
            self.save_and_next();
            count += 1;
        }
        if self.current == s { count } else { -count - 1 }
    }

    /// Contents of a long string, or nothing for a long comment
    fn read_long_string(&mut self, is_string: bool, sep: i32) -> Result<Vec<u8>, String> {
        self.save_and_next();
        if self.curr_is_newline() {
            self.inc_line()?;
        }
        loop {
            match self.current {
                EOZ => {
                    let msg = if is_string {
                        "unfinished long string"
                    } else {
                        "unfinished long comment"
                    };
                    return Err(self.error_at(msg, Some(LuaTokenKind::Eos)));
                }
                c if c == b']' as i32 => {
                    if self.skip_sep() == sep {
                        self.save_and_next();
                        break;
                    }
                }
                c if c == b'\n' as i32 || c == b'\r' as i32 => {
                    self.save(b'\n' as i32);
                    self.inc_line()?;
                    if !is_string {
                        self.buf.clear();
                    }
                }
                _ => {
                    if is_string {
                        self.save_and_next();
                    } else {
                        self.next_char();
                    }
                }
            }
        }
        if !is_string {
            return Ok(Vec::new());
        }
        let skip = (2 + sep) as usize;
        Ok(self.buf[skip..self.buf.len() - skip].to_vec())
    }

    fn read_string(&mut self, vm: &mut LuaVM, del: i32) -> Result<StringId, String> {
        self.save_and_next();
        while self.current != del {
            match self.current {
                EOZ => {
                    return Err(self.error_at("unfinished string", Some(LuaTokenKind::Eos)));
                }
                c if c == b'\n' as i32 || c == b'\r' as i32 => {
                    return Err(self.error_near_buffer("unfinished string"));
                }
                c if c == b'\\' as i32 => {
                    self.next_char();
                    let escaped = match self.current {
                        EOZ => continue,
                        c if c == b'\n' as i32 || c == b'\r' as i32 => {
                            self.save(b'\n' as i32);
                            self.inc_line()?;
                            continue;
                        }
                        c => match c as u8 {
                            b'a' => 0x07,
                            b'b' => 0x08,
                            b'f' => 0x0c,
                            b'n' => b'\n',
                            b'r' => b'\r',
                            b't' => b'\t',
                            b'v' => 0x0b,
                            d if d.is_ascii_digit() => {
                                let mut value: i32 = 0;
                                let mut i = 0;
                                loop {
                                    value = 10 * value + (self.current - b'0' as i32);
                                    self.next_char();
                                    i += 1;
                                    if i >= 3 || !self.current_digit() {
                                        break;
                                    }
                                }
                                if value > u8::MAX as i32 {
                                    return Err(self.error_near_buffer("escape sequence too large"));
                                }
                                self.save(value);
                                continue;
                            }
                            _ => {
                                // \\, \", \' and any other character stand for themselves
                                self.save_and_next();
                                continue;
                            }
                        },
                    };
                    self.save(escaped as i32);
                    self.next_char();
                }
                _ => self.save_and_next(),
            }
        }
        self.save_and_next();
        let contents = self.buf[1..self.buf.len() - 1].to_vec();
        Ok(vm.intern(&contents))
    }

    fn lex(&mut self, vm: &mut LuaVM) -> Result<LuaTokenKind, String> {
        self.buf.clear();
        loop {
            let c = self.current;
            if c == EOZ {
                return Ok(LuaTokenKind::Eos);
            }
            let ch = c as u8;
            match ch {
                b'\n' | b'\r' => {
                    self.inc_line()?;
                }
                b'-' => {
                    self.next_char();
                    if !self.current_is(b'-') {
                        return Ok(LuaTokenKind::Char(b'-'));
                    }
                    self.next_char();
                    if self.current_is(b'[') {
                        let sep = self.skip_sep();
                        self.buf.clear();
                        if sep >= 0 {
                            self.read_long_string(false, sep)?;
                            self.buf.clear();
                            continue;
                        }
                    }
                    while !self.curr_is_newline() && self.current != EOZ {
                        self.next_char();
                    }
                }
                b'[' => {
                    let sep = self.skip_sep();
                    if sep >= 0 {
                        let contents = self.read_long_string(true, sep)?;
                        return Ok(LuaTokenKind::String(vm.intern(&contents)));
                    } else if sep == -1 {
                        return Ok(LuaTokenKind::Char(b'['));
                    } else {
                        return Err(self.error_near_buffer("invalid long string delimiter"));
                    }
                }
                b'=' | b'<' | b'>' | b'~' => {
                    self.next_char();
                    if !self.current_is(b'=') {
                        return Ok(LuaTokenKind::Char(ch));
                    }
                    self.next_char();
                    return Ok(match ch {
                        b'=' => LuaTokenKind::Eq,
                        b'<' => LuaTokenKind::Le,
                        b'>' => LuaTokenKind::Ge,
                        _ => LuaTokenKind::Ne,
                    });
                }
                b'"' | b'\'' => {
                    let s = self.read_string(vm, c)?;
                    return Ok(LuaTokenKind::String(s));
                }
                b'.' => {
                    self.save_and_next();
                    if self.check_next(b".") {
                        if self.check_next(b".") {
                            return Ok(LuaTokenKind::Dots);
                        }
                        return Ok(LuaTokenKind::Concat);
                    } else if !self.current_digit() {
                        return Ok(LuaTokenKind::Char(b'.'));
                    }
                    return self.read_numeral();
                }
                _ if ch.is_ascii_whitespace() || ch == 0x0b => {
                    self.next_char();
                }
                _ if ch.is_ascii_digit() => {
                    return self.read_numeral();
                }
                _ if ch.is_ascii_alphabetic() || ch == b'_' => {
                    loop {
                        self.save_and_next();
                        if self.current == EOZ {
                            break;
                        }
                        let c = self.current as u8;
                        if !(c.is_ascii_alphanumeric() || c == b'_') {
                            break;
                        }
                    }
                    let id = vm.intern(&self.buf);
                    if let Some((_, kind)) = self.reserved.iter().find(|(r, _)| *r == id) {
                        return Ok(*kind);
                    }
                    return Ok(LuaTokenKind::Name(id));
                }
                _ => {
                    self.next_char();
                    return Ok(LuaTokenKind::Char(ch));
                }
            }
        }
    }
}

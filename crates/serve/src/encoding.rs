//! `Accept-Encoding` negotiation.
//!
//! Only the two offline-precompressed encodings are negotiable; brotli wins
//! over gzip whenever the client accepts both. A wildcard accepts both, a
//! `q=0` parameter refuses the named encoding.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptEncoding {
    brotli: bool,
    gzip: bool,
}

impl AcceptEncoding {
    pub fn parse(header: &str) -> Self {
        let mut accept = Self::default();
        for part in header.split(',') {
            let mut params = part.trim().split(';');
            let name = params.next().unwrap_or("").trim();
            if params.any(is_q_zero) {
                continue;
            }
            match name {
                "br" => accept.brotli = true,
                "gzip" | "x-gzip" => accept.gzip = true,
                "*" => {
                    accept.brotli = true;
                    accept.gzip = true;
                }
                _ => {}
            }
        }
        accept
    }

    pub fn allows_brotli(&self) -> bool {
        self.brotli
    }

    pub fn allows_gzip(&self) -> bool {
        self.gzip
    }
}

fn is_q_zero(param: &str) -> bool {
    param
        .trim()
        .strip_prefix("q=")
        .and_then(|q| q.trim().parse::<f32>().ok())
        .is_some_and(|q| q == 0.0)
}

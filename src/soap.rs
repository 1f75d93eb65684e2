//! SOAP envelope construction and lightweight XML scanning.
//!
//! The vim wire format is verbose but highly regular, so rather than a
//! full XML tree we extract what we need with string scanning: leaf text,
//! repeated leaf text, and whole tag blocks. Builders escape values on the
//! way out; extractors unescape on the way in.

/// Wrap an operation body in a SOAP 1.1 envelope with the vim25 namespace.
pub fn envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soapenv:Envelope \
         xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
         <soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"
    )
}

/// Escape the five XML entities.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`xml_escape`].
pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// A leaf element, escaped: `<tag>value</tag>`.
pub fn elem(tag: &str, value: &str) -> String {
    format!("<{tag}>{}</{tag}>", xml_escape(value))
}

/// Find the byte offset of `<tag ...>` or `<tag>` starting at `from`,
/// rejecting longer tag names that merely share the prefix.
fn find_tag_start(xml: &str, from: usize, tag: &str) -> Option<usize> {
    let open = format!("<{tag}");
    let mut search = from;
    while let Some(pos) = xml[search..].find(&open) {
        let abs = search + pos;
        let after = abs + open.len();
        match xml.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'/') | Some(b'\t') | Some(b'\n') => return Some(abs),
            _ => search = after,
        }
    }
    None
}

/// Extract the text content of the first `<tag>` element, unescaped.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let start = find_tag_start(xml, 0, tag)?;
    let close = format!("</{tag}>");
    let gt = xml[start..].find('>')?;
    let content_start = start + gt + 1;
    let end = xml[content_start..].find(&close)?;
    Some(xml_unescape(&xml[content_start..content_start + end]))
}

/// Extract all occurrences of a leaf tag, unescaped.
pub fn xml_text_all(xml: &str, tag: &str) -> Vec<String> {
    let close = format!("</{tag}>");
    let mut results = Vec::new();
    let mut search_from = 0;
    while let Some(start) = find_tag_start(xml, search_from, tag) {
        let Some(gt) = xml[start..].find('>') else { break };
        let content_start = start + gt + 1;
        let Some(end) = xml[content_start..].find(&close) else { break };
        results.push(xml_unescape(&xml[content_start..content_start + end]));
        search_from = content_start + end + close.len();
    }
    results
}

/// Extract the first whole `<tag ...>...</tag>` block, tags included.
pub fn xml_block(xml: &str, tag: &str) -> Option<String> {
    xml_block_from(xml, 0, tag).map(|(block, _)| block)
}

/// Extract all `<tag>` blocks.
pub fn xml_blocks(xml: &str, tag: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut search_from = 0;
    while let Some((block, end)) = xml_block_from(xml, search_from, tag) {
        results.push(block);
        search_from = end;
    }
    results
}

fn xml_block_from(xml: &str, from: usize, tag: &str) -> Option<(String, usize)> {
    let close = format!("</{tag}>");
    let start = find_tag_start(xml, from, tag)?;
    // Self-closing form has no content
    let gt = start + xml[start..].find('>')?;
    if xml.as_bytes()[gt - 1] == b'/' {
        return Some((xml[start..=gt].to_string(), gt + 1));
    }
    let end = xml[start..].find(&close)?;
    let full_end = start + end + close.len();
    Some((xml[start..full_end].to_string(), full_end))
}

/// Read an attribute value from the opening tag of a block. The match is
/// anchored at an attribute boundary so `type` never reads `xsi:type`.
pub fn xml_attr(block: &str, attr: &str) -> Option<String> {
    let gt = block.find('>')?;
    let head = &block[..gt];
    let needle = format!("{attr}=\"");
    let mut search = 0;
    while let Some(pos) = head[search..].find(&needle) {
        let abs = search + pos;
        if abs > 0 && matches!(head.as_bytes()[abs - 1], b' ' | b'\t' | b'\n') {
            let start = abs + needle.len();
            let end = head[start..].find('"')?;
            return Some(xml_unescape(&head[start..start + end]));
        }
        search = abs + needle.len();
    }
    None
}

/// Extract the `<faultstring>` of a SOAP fault body, if present.
pub fn fault_string(xml: &str) -> Option<String> {
    if !xml.contains(":Fault>") && !xml.contains("<Fault>") {
        return None;
    }
    xml_text(xml, "faultstring")
}

use crate::brackets::{LINK_MARKERS, balanced_spans, split_top_level};
use crate::html::{escape_attr, expand_url_pattern};
use crate::render::RenderOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFrame {
    #[default]
    Inline,
    Thumb,
    Frame,
    Frameless,
    Border,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAlign {
    Left,
    Right,
    Center,
    None,
}

impl MediaAlign {
    fn class(self) -> &'static str {
        match self {
            Self::Left => "tleft",
            Self::Right => "tright",
            Self::Center => "tcenter",
            Self::None => "tnone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaEmbed {
    pub file: String,
    pub frame: MediaFrame,
    pub align: Option<MediaAlign>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub upright: bool,
    pub alt: Option<String>,
    /// `Some("")` disables the link; `None` links to the file page.
    pub link: Option<String>,
    pub caption: Option<String>,
}

impl MediaEmbed {
    pub fn is_figure(&self) -> bool {
        matches!(self.frame, MediaFrame::Thumb | MediaFrame::Frame)
    }
}

/// Parse the segments after the file name. Keywords may come in any order;
/// the last segment that is not a keyword is the caption.
pub fn parse_media(file: &str, options: &[&str]) -> MediaEmbed {
    let mut embed = MediaEmbed {
        file: file.trim().to_string(),
        ..MediaEmbed::default()
    };

    for option in options {
        let trimmed = option.trim();
        let lowered = trimmed.to_lowercase();
        match lowered.as_str() {
            "thumb" | "thumbnail" => embed.frame = MediaFrame::Thumb,
            "frame" | "framed" => embed.frame = MediaFrame::Frame,
            "frameless" => embed.frame = MediaFrame::Frameless,
            "border" => embed.frame = MediaFrame::Border,
            "left" => embed.align = Some(MediaAlign::Left),
            "right" => embed.align = Some(MediaAlign::Right),
            "center" | "centre" => embed.align = Some(MediaAlign::Center),
            "none" => embed.align = Some(MediaAlign::None),
            "upright" => embed.upright = true,
            _ => {
                if lowered.starts_with("upright=") || lowered.starts_with("upright ") {
                    embed.upright = true;
                } else if let Some(value) = keyword_value(trimmed, "alt") {
                    embed.alt = Some(value.to_string());
                } else if let Some(value) = keyword_value(trimmed, "link") {
                    embed.link = Some(value.to_string());
                } else if let Some((width, height)) = parse_size(&lowered) {
                    embed.width = width.or(embed.width);
                    embed.height = height.or(embed.height);
                } else {
                    embed.caption = Some(trimmed.to_string());
                }
            }
        }
    }
    embed
}

fn keyword_value<'a>(option: &'a str, keyword: &str) -> Option<&'a str> {
    let (key, value) = option.split_once('=')?;
    key.trim()
        .eq_ignore_ascii_case(keyword)
        .then_some(value.trim())
}

/// `200px`, `200x100px` or `x100px`.
fn parse_size(option: &str) -> Option<(Option<u32>, Option<u32>)> {
    let dimensions = option.strip_suffix("px")?.trim();
    let (width, height) = match dimensions.split_once('x') {
        Some((width, height)) => (width.trim(), Some(height.trim())),
        None => (dimensions, None),
    };
    let width = if width.is_empty() {
        None
    } else {
        Some(width.parse::<u32>().ok()?)
    };
    let height = match height {
        Some(height) => Some(height.parse::<u32>().ok()?),
        None => None,
    };
    if width.is_none() && height.is_none() {
        return None;
    }
    Some((width, height))
}

/// Render an embed. `render_caption` turns caption wiki text into HTML for
/// the figure caption.
pub fn render_media(
    embed: &MediaEmbed,
    options: &RenderOptions,
    render_caption: &mut dyn FnMut(&str) -> String,
) -> String {
    let src = expand_url_pattern(&options.file_path, &embed.file);
    let plain_caption = embed.caption.as_deref().map(plain_text);
    let alt = embed
        .alt
        .clone()
        .or_else(|| plain_caption.clone())
        .unwrap_or_else(|| embed.file.clone());

    let mut image = format!("<img src=\"{}\" alt=\"{}\"", escape_attr(&src), escape_attr(&alt));
    if let Some(width) = embed.width {
        image.push_str(&format!(" width=\"{width}\""));
    }
    if let Some(height) = embed.height {
        image.push_str(&format!(" height=\"{height}\""));
    }
    let mut classes = Vec::new();
    match embed.frame {
        MediaFrame::Border => classes.push("border"),
        MediaFrame::Frameless => classes.push("frameless"),
        _ => {}
    }
    if embed.upright {
        classes.push("upright");
    }
    if !embed.is_figure()
        && let Some(align) = embed.align
    {
        classes.push(align.class());
    }
    if !classes.is_empty() {
        image.push_str(&format!(" class=\"{}\"", classes.join(" ")));
    }
    if !embed.is_figure()
        && let Some(caption) = &plain_caption
    {
        image.push_str(&format!(" title=\"{}\"", escape_attr(caption)));
    }
    image.push('>');

    let linked = match link_target(embed, options) {
        Some(href) => format!(
            "<a href=\"{}\" class=\"mw-file-description\">{image}</a>",
            escape_attr(&href)
        ),
        None => image,
    };

    if !embed.is_figure() {
        return linked;
    }

    let kind = match embed.frame {
        MediaFrame::Frame => "frame",
        _ => "thumb",
    };
    let align = embed.align.unwrap_or(MediaAlign::Right).class();
    let caption = embed
        .caption
        .as_deref()
        .map(|caption| render_caption(caption))
        .unwrap_or_default();
    format!("<figure class=\"{kind} {align}\">{linked}<figcaption>{caption}</figcaption></figure>")
}

fn link_target(embed: &MediaEmbed, options: &RenderOptions) -> Option<String> {
    match embed.link.as_deref() {
        None => Some(expand_url_pattern(
            &options.article_path,
            &format!("File:{}", embed.file),
        )),
        Some("") => None,
        Some(link) if is_external_url(link) => Some(link.to_string()),
        Some(link) => Some(expand_url_pattern(&options.article_path, link)),
    }
}

pub(crate) fn is_external_url(value: &str) -> bool {
    let lowered = value.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://") || lowered.starts_with("//")
}

/// Caption text with link syntax and quote markers removed, for attributes.
fn plain_text(caption: &str) -> String {
    let mut out = String::with_capacity(caption.len());
    let mut cursor = 0usize;
    for span in balanced_spans(caption, LINK_MARKERS) {
        out.push_str(&caption[cursor..span.start]);
        let inner = &caption[span.start + 2..span.end - 2];
        let segments = split_top_level(inner, '|');
        let visible = segments.last().copied().unwrap_or_default();
        out.push_str(visible.trim().trim_start_matches(':'));
        cursor = span.end;
    }
    out.push_str(&caption[cursor..]);
    out.replace("'''", "").replace("''", "")
}

#[cfg(test)]
mod tests {
    use super::{MediaAlign, MediaFrame, parse_media, plain_text, render_media};
    use crate::render::RenderOptions;

    #[test]
    fn parses_keywords_sizes_and_caption() {
        let embed = parse_media(
            "Logo.png",
            &["thumb", "left", "200x100px", "alt=Company logo", "first", " The logo "],
        );
        assert_eq!(embed.frame, MediaFrame::Thumb);
        assert_eq!(embed.align, Some(MediaAlign::Left));
        assert_eq!(embed.width, Some(200));
        assert_eq!(embed.height, Some(100));
        assert_eq!(embed.alt.as_deref(), Some("Company logo"));
        assert_eq!(embed.caption.as_deref(), Some("The logo"));
    }

    #[test]
    fn height_only_size() {
        let embed = parse_media("A.png", &["x80px"]);
        assert_eq!(embed.width, None);
        assert_eq!(embed.height, Some(80));
        let not_size = parse_media("A.png", &["xpx"]);
        assert_eq!(not_size.caption.as_deref(), Some("xpx"));
    }

    #[test]
    fn thumb_renders_figure_with_caption() {
        let embed = parse_media("Logo.png", &["thumb", "A [[Page]]"]);
        let mut caption = |text: &str| format!("<{text}>");
        let html = render_media(&embed, &RenderOptions::default(), &mut caption);
        assert_eq!(
            html,
            "<figure class=\"thumb tright\"><a href=\"/wiki/File:Logo.png\" class=\"mw-file-description\"><img src=\"/media/Logo.png\" alt=\"A Page\"></a><figcaption><A [[Page]]></figcaption></figure>"
        );
    }

    #[test]
    fn inline_image_uses_caption_as_title_and_honors_link() {
        let embed = parse_media("Icon.svg", &["20px", "link=", "Settings"]);
        let mut caption = |text: &str| text.to_string();
        let html = render_media(&embed, &RenderOptions::default(), &mut caption);
        assert_eq!(
            html,
            "<img src=\"/media/Icon.svg\" alt=\"Settings\" width=\"20\" title=\"Settings\">"
        );

        let external = parse_media("Icon.svg", &["link=https://example.org"]);
        let html = render_media(&external, &RenderOptions::default(), &mut caption);
        assert!(html.starts_with("<a href=\"https://example.org\""));
    }

    #[test]
    fn plain_text_strips_links_and_quotes() {
        assert_eq!(plain_text("See [[Main Page|the ''home'']] and [[:Other]]"), "See the home and Other");
    }
}

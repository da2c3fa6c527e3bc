//! EPUB 3 writer: mimetype, container, OPF, nav + NCX, title page, contents page, chapters and
//! embedded images.

use crate::formats::{resolve_image, validate_story, FormatError, Formatter};
use crate::model::Story;
use crate::processor::map_image_sources;
use std::io::{Seek, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.4; }
h1, h2 { text-align: center; }
p { text-indent: 1.5em; margin: 0.3em 0; }
hr { margin: 1.5em 25%; }
img { display: block; max-width: 100%; height: auto; margin: 1em auto; }
.title-page { text-align: center; margin-top: 3em; }
.title-page p { text-indent: 0; }
";

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: story has no chapters.")]
    NoChapters,

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpubFormatter;

impl Formatter for EpubFormatter {
    fn format_and_save(&self, story: &Story, path: &Path) -> Result<(), FormatError> {
        validate_story(story)?;
        write_epub(story, path)?;
        Ok(())
    }
}

/// One image stored in the archive.
struct PackedImage<'a> {
    url: &'a str,
    href: String,
    bytes: &'a [u8],
}

/// Chapter bodies with image sources pointing into the archive, plus the images to pack.
fn pack_images(story: &Story) -> (Vec<String>, Vec<PackedImage<'_>>) {
    let mut images: Vec<PackedImage<'_>> = Vec::new();
    let bodies: Vec<String> = story
        .chapters
        .iter()
        .map(|ch| {
            map_image_sources(&ch.content, |src| {
                let image = resolve_image(story, src)?;
                let data = image.data.as_ref()?;
                let href = match images.iter().find(|p| p.url == image.url) {
                    Some(packed) => packed.href.clone(),
                    None => {
                        let href = format!("images/{}.jpg", images.len() + 1);
                        images.push(PackedImage {
                            url: &image.url,
                            href: href.clone(),
                            bytes: &data.bytes,
                        });
                        href
                    }
                };
                Some(format!(r#"<img src="{}" alt=""/>"#, href))
            })
        })
        .collect();
    (bodies, images)
}

/// Write a finished [Story] to an EPUB 3 file. Images that were not downloaded are left out.
pub fn write_epub(story: &Story, path: &Path) -> Result<(), EpubError> {
    if story.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }

    let path = path.to_path_buf();
    let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
        path: path.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // 1. Mimetype first, uncompressed (required by the EPUB container format)
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    // 2. Container
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    let (bodies, images) = pack_images(story);

    write_opf(story, &images, &mut zip, options_deflate)?;
    write_nav_xhtml(story, &mut zip, options_deflate)?;
    write_ncx(story, &mut zip, options_deflate)?;
    zip.start_file(format!("{}style.css", OEBPS_PREFIX), options_deflate)?;
    zip.write_all(STYLESHEET.as_bytes())?;
    write_title_page(story, &mut zip, options_deflate)?;
    write_toc_page_xhtml(story, &mut zip, options_deflate)?;
    write_chapters(story, &bodies, &mut zip, options_deflate)?;

    // Images are already JPEG; deflating them again gains nothing.
    for image in &images {
        zip.start_file(format!("{}{}", OEBPS_PREFIX, image.href), options_stored)?;
        zip.write_all(image.bytes)?;
    }

    zip.finish()?;
    Ok(())
}

fn identifier(story: &Story) -> String {
    if story.metadata.url.is_empty() {
        format!("urn:storyfetch:{}", crate::formats::sanitize_title(&story.metadata.title))
    } else {
        story.metadata.url.clone()
    }
}

fn write_opf(
    story: &Story,
    images: &[PackedImage<'_>],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let m = &story.metadata;
    let description_el = m
        .summary
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|d| format!("    <dc:description>{}</dc:description>\n", xml_escape(d)))
        .unwrap_or_default();

    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="title-page" href="title.xhtml" media-type="application/xhtml+xml"/>
    <item id="toc-page" href="toc.xhtml" media-type="application/xhtml+xml"/>
"#,
    );
    for i in 1..=story.chapters.len() {
        manifest.push_str(&format!(
            "    <item id=\"chapter-{i}\" href=\"chapter-{i}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
        ));
    }
    for (i, image) in images.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"image-{}\" href=\"{}\" media-type=\"image/jpeg\"/>\n",
            i + 1,
            image.href
        ));
    }

    let mut spine = String::from(
        "    <itemref idref=\"title-page\"/>\n    <itemref idref=\"toc-page\"/>\n",
    );
    for i in 1..=story.chapters.len() {
        spine.push_str(&format!("    <itemref idref=\"chapter-{}\"/>\n", i));
    }

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>en</dc:language>
    <dc:date>{published}</dc:date>
    <dc:source>{source}</dc:source>
{description_el}    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        id = xml_escape(&identifier(story)),
        title = xml_escape(&m.title),
        creator = xml_escape(&m.author),
        published = xml_escape(&m.date_published),
        source = xml_escape(&m.url),
        description_el = description_el,
        modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        manifest = manifest,
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn chapter_links(story: &Story) -> String {
    story
        .chapters
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            format!(
                "      <li><a href=\"chapter-{}.xhtml\">{}</a></li>\n",
                i + 1,
                xml_escape(&ch.heading(i + 1))
            )
        })
        .collect()
}

fn write_nav_xhtml(
    story: &Story,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
        chapter_links(story)
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

/// Visible table-of-contents page, placed after the title page.
fn write_toc_page_xhtml(
    story: &Story,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let toc_xhtml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <h1>Table of Contents</h1>
    <ol>
{}    </ol>
</body>
</html>
"#,
        chapter_links(story)
    );
    zip.start_file(format!("{}toc.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(toc_xhtml.as_bytes())?;
    Ok(())
}

fn write_ncx(
    story: &Story,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, ch) in story.chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="chapter-{n}.xhtml"/>
    </navPoint>
"#,
            n = i + 1,
            label = xml_escape(&ch.heading(i + 1)),
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&identifier(story)),
        xml_escape(&story.metadata.title),
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

/// Title page with the story's metadata.
fn write_title_page(
    story: &Story,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let m = &story.metadata;
    let summary = m
        .summary
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("    <p class=\"summary\">{}</p>\n", xml_escape(s)))
        .unwrap_or_default();
    let page = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <div class="title-page">
    <h1>{title}</h1>
    <p>by {author}</p>
{summary}    <hr/>
    <p>Published: {published}</p>
    <p>Updated: {updated}</p>
    <p>Downloaded: {extracted}</p>
    <p>Chapters: {chapters}</p>
    <p>Words: {words}</p>
    <p><a href="{url_attr}">{url}</a></p>
  </div>
</body>
</html>
"#,
        title = xml_escape(&m.title),
        author = xml_escape(&m.author),
        summary = summary,
        published = xml_escape(&m.date_published),
        updated = xml_escape(&m.date_updated),
        extracted = xml_escape(&m.date_extracted),
        chapters = story.chapters.len(),
        words = m.word_count,
        url_attr = xml_escape(&m.url),
        url = xml_escape(&m.url),
    );
    zip.start_file(format!("{}title.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(page.as_bytes())?;
    Ok(())
}

fn write_chapters(
    story: &Story,
    bodies: &[String],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    for (i, (ch, body)) in story.chapters.iter().zip(bodies).enumerate() {
        let heading = xml_escape(&ch.heading(i + 1));
        let html = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{heading}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
<h2>{heading}</h2>
{body}
</body>
</html>
"#,
        );
        let name = format!("{}chapter-{}.xhtml", OEBPS_PREFIX, i + 1);
        zip.start_file(name, options)?;
        zip.write_all(html.as_bytes())?;
    }
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::storage::patterns::{PatternList, matches_at_start};
use crate::utils::format::quote_path;
use crate::utils::icons::IconFactory;

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".png", ".gif"];

/// Byte count for files, `(subdirectories, files)` for directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntrySize {
    File(u64),
    Directory(u64, u64),
}

/// One row of a directory listing, `[name, size, icon]` on the wire.
///
/// Directory names end with `/`. `icon` is the file name of the cover image
/// inside that directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(String, EntrySize, Option<String>)",
    into = "(String, EntrySize, Option<String>)"
)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: EntrySize,
    pub icon: Option<String>,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

impl From<(String, EntrySize, Option<String>)> for DirectoryEntry {
    fn from((name, size, icon): (String, EntrySize, Option<String>)) -> Self {
        Self { name, size, icon }
    }
}

impl From<DirectoryEntry> for (String, EntrySize, Option<String>) {
    fn from(entry: DirectoryEntry) -> Self {
        (entry.name, entry.size, entry.icon)
    }
}

/// Knobs for building a listing.
pub struct ListingOptions<'a> {
    pub hidden: &'a PatternList,
    pub covers: &'a PatternList,
    pub max_image_size: u64,
}

/// List the visible entries of `dir`, sorted by name.
///
/// Only a failure to read `dir` itself is an error; unreadable entries are
/// logged and left out.
pub fn list_directory(dir: &Path, options: &ListingOptions<'_>) -> io::Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Error while listing {:?}: {}", dir, e);
                continue;
            }
        };
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            debug!("Could not decode file name {:?} in {:?}", file_name, dir);
            continue;
        };
        if options.hidden.matches_any(name) {
            continue;
        }

        let path = entry.path();
        match describe(&path, name, options) {
            Ok(listed) => entries.push(listed),
            Err(e) => debug!("Skipping {:?}: {}", path, e),
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn describe(path: &Path, name: &str, options: &ListingOptions<'_>) -> io::Result<DirectoryEntry> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(DirectoryEntry {
            name: name.to_string(),
            size: EntrySize::File(metadata.len()),
            icon: None,
        });
    }

    let mut dirs = 0;
    let mut files = 0;
    let mut children = Vec::new();
    for child in fs::read_dir(path)? {
        let child = child?;
        let child_name = child.file_name();
        let Some(child_name) = child_name.to_str() else {
            continue;
        };
        if options.hidden.matches_any(child_name) {
            continue;
        }
        if child.path().is_dir() {
            dirs += 1;
        } else {
            files += 1;
        }
        children.push(child_name.to_string());
    }
    children.sort();

    Ok(DirectoryEntry {
        name: format!("{}/", name),
        size: EntrySize::Directory(dirs, files),
        icon: find_cover(path, &children, options.covers, options.max_image_size),
    })
}

/// First child matching the cover patterns in priority order whose size is
/// below `max_image_size`.
pub fn find_cover(
    dir: &Path,
    children: &[String],
    covers: &PatternList,
    max_image_size: u64,
) -> Option<String> {
    for pattern in covers.iter() {
        for name in children {
            if !matches_at_start(pattern, name) {
                continue;
            }
            match fs::metadata(dir.join(name)) {
                Ok(metadata) if metadata.len() < max_image_size => return Some(name.clone()),
                Ok(_) => debug!("Cover candidate {} in {:?} is too large", name, dir),
                Err(e) => debug!("Cannot stat cover candidate {} in {:?}: {}", name, dir, e),
            }
        }
    }
    None
}

/// Escape text for use in HTML content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn parent_href(request_path: &str) -> Option<String> {
    if request_path.matches('/').count() <= 1 {
        return None;
    }
    let trimmed = request_path.trim_end_matches('/');
    let parent = trimmed.rsplit_once('/').map_or("", |(parent, _)| parent);
    Some(format!("{}/", quote_path(parent)))
}

/// Render a browsable HTML page for `entries`, listed at `request_path`.
pub fn render_html(
    request_path: &str,
    entries: &[DirectoryEntry],
    icons: &dyn IconFactory,
    max_image_size: u64,
) -> String {
    let display_path = escape_html(request_path);
    let mut html = format!(
        "<html><head><title>Index of {0}</title>\
         <link rel=\"stylesheet\" type=\"text/css\" href=\"/__data__/directoryindex.css\">\
         </head><body><h1>{0}</h1>",
        display_path
    );

    if let Some(parent) = parent_href(request_path) {
        let up = icons.get_icon("go-up").unwrap_or_default();
        html.push_str(&format!(
            "<a href=\"{}\"><img class=\"action\" src=\"{}\" alt=\"..\" /></a>",
            escape_html(&parent),
            escape_html(&up)
        ));
    }

    html.push_str("<ul>");
    for (i, entry) in entries.iter().enumerate() {
        let (title, icon) = match (&entry.size, &entry.icon) {
            (EntrySize::Directory(dirs, files), cover) => (
                format!("{} Directories, {} Files", dirs, files),
                match cover {
                    Some(cover) => Some(quote_path(&format!("{}{}", entry.name, cover))),
                    None => icons.get_icon("folder"),
                },
            ),
            (EntrySize::File(size), _) => {
                let is_image = IMAGE_EXTENSIONS.iter().any(|ext| entry.name.ends_with(ext));
                let icon = if is_image && *size < max_image_size {
                    Some(quote_path(&entry.name))
                } else {
                    icons.guess_icon(&entry.name)
                };
                (format!("{} Bytes", size), icon)
            }
        };

        html.push_str(&format!(
            "<li class=\"{}\"><a href=\"{}\" title=\"{}\">\
             <img width=\"32\" height=\"32\" src=\"{}\" alt=\"\">{}</a></li>",
            if i % 2 == 0 { "even" } else { "odd" },
            escape_html(&quote_path(&entry.name)),
            title,
            escape_html(&icon.unwrap_or_default()),
            escape_html(&entry.name)
        ));
    }
    html.push_str("</ul></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoIcons;

    impl IconFactory for NoIcons {
        fn get_icon(&self, name: &str) -> Option<String> {
            Some(format!("/icons/{}.png", name))
        }
    }

    fn patterns() -> (PatternList, PatternList) {
        let hidden = PatternList::new(&[r"\..*", r"Thumbs\.db"], false).unwrap();
        let covers = PatternList::new(&[r"\.?folder\.(png|jpg|gif|img)$", r"cover.*?\.(png|jpg|gif)$"], true).unwrap();
        (hidden, covers)
    }

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Album/Disc 1")).unwrap();
        fs::create_dir_all(root.join("Album/.cache")).unwrap();
        fs::create_dir_all(root.join("Big")).unwrap();
        fs::write(root.join("Album/cover.jpg"), vec![0u8; 10]).unwrap();
        fs::write(root.join("Album/Folder.jpg"), vec![0u8; 5000]).unwrap();
        fs::write(root.join("Album/track.ogg"), vec![0u8; 3]).unwrap();
        fs::write(root.join("Album/.hidden"), b"x").unwrap();
        fs::write(root.join("Big/cover.png"), vec![0u8; 2000]).unwrap();
        fs::write(root.join("readme.txt"), b"hello").unwrap();
        fs::write(root.join("Thumbs.db"), b"x").unwrap();
        dir
    }

    #[test]
    fn test_list_directory() {
        let dir = sample_tree();
        let (hidden, covers) = patterns();
        let options = ListingOptions {
            hidden: &hidden,
            covers: &covers,
            max_image_size: 1000,
        };

        let entries = list_directory(dir.path(), &options).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Album/", "Big/", "readme.txt"]);

        // Folder.jpg comes first in priority but is too large.
        assert_eq!(entries[0].size, EntrySize::Directory(1, 3));
        assert_eq!(entries[0].icon.as_deref(), Some("cover.jpg"));
        assert_eq!(entries[1].icon, None);
        assert_eq!(entries[2].size, EntrySize::File(5));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (hidden, covers) = patterns();
        let options = ListingOptions {
            hidden: &hidden,
            covers: &covers,
            max_image_size: 1000,
        };
        assert!(list_directory(&dir.path().join("nope"), &options).is_err());
    }

    #[test]
    fn test_json_shape() {
        let entries = vec![
            DirectoryEntry {
                name: "Album/".to_string(),
                size: EntrySize::Directory(1, 3),
                icon: Some("cover.jpg".to_string()),
            },
            DirectoryEntry {
                name: "readme.txt".to_string(),
                size: EntrySize::File(5),
                icon: None,
            },
        ];
        let json = serde_json::to_string(&entries).unwrap();
        assert_eq!(json, r#"[["Album/",[1,3],"cover.jpg"],["readme.txt",5,null]]"#);

        let parsed: Vec<DirectoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_render_html() {
        let entries = vec![
            DirectoryEntry {
                name: "a <b>/".to_string(),
                size: EntrySize::Directory(0, 1),
                icon: None,
            },
            DirectoryEntry {
                name: "pic.png".to_string(),
                size: EntrySize::File(10),
                icon: None,
            },
        ];
        let html = render_html("/music/", &entries, &NoIcons, 1000);

        assert!(html.contains("<title>Index of /music/</title>"));
        assert!(html.contains("href=\"/\""));
        assert!(html.contains("href=\"a%20%3Cb%3E/\""));
        assert!(html.contains(">a &lt;b&gt;/</a>"));
        assert!(html.contains("src=\"/icons/folder.png\""));
        assert!(html.contains("src=\"pic.png\""));
        assert!(html.contains("0 Directories, 1 Files"));
    }

    #[test]
    fn test_parent_href() {
        assert_eq!(parent_href("/"), None);
        assert_eq!(parent_href("/a/").as_deref(), Some("/"));
        assert_eq!(parent_href("/a/b/").as_deref(), Some("/a/"));
    }
}

use std::path::PathBuf;

/// Maps file names to icon references for the HTML directory listing.
pub trait IconFactory: Send + Sync {
    /// Reference to the icon called `name`, if the factory has one.
    fn get_icon(&self, name: &str) -> Option<String>;

    fn guess_icon(&self, filename: &str) -> Option<String> {
        if filename.ends_with('/') {
            return self.get_icon("folder");
        }
        if let Some(mime) = mime_guess::from_path(filename).first() {
            let full = format!("{}-{}", mime.type_(), mime.subtype());
            let generic = format!("{}-x-generic", mime.type_());
            for candidate in [full.as_str(), generic.as_str()] {
                if let Some(icon) = self.get_icon(candidate) {
                    return Some(icon);
                }
            }
        }
        self.get_icon("text-x-generic-template")
    }
}

/// Icons served from the bundled data directory, referenced by URL.
pub struct UrlIconFactory {
    document_root: PathBuf,
    url_root: String,
    extension: String,
}

impl UrlIconFactory {
    pub fn new(document_root: PathBuf, url_root: &str, extension: &str) -> Self {
        Self {
            document_root,
            url_root: url_root.to_string(),
            extension: extension.to_string(),
        }
    }
}

impl IconFactory for UrlIconFactory {
    fn get_icon(&self, name: &str) -> Option<String> {
        let file = format!("{}{}", name, self.extension);
        if self.document_root.join(&file).is_file() {
            Some(format!("{}{}", self.url_root, file))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_guess_icon() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["folder", "image-x-generic", "text-x-generic-template"] {
            fs::write(dir.path().join(format!("{}.png", name)), b"").unwrap();
        }
        let url_root = "/__data__/icons/32x32/";
        let factory = UrlIconFactory::new(dir.path().to_path_buf(), url_root, ".png");

        assert_eq!(
            factory.guess_icon("foo/"),
            Some(format!("{}folder.png", url_root))
        );
        assert_eq!(
            factory.guess_icon("foo.jpg"),
            Some(format!("{}image-x-generic.png", url_root))
        );
        assert_eq!(
            factory.guess_icon(""),
            Some(format!("{}text-x-generic-template.png", url_root))
        );
        assert_eq!(factory.get_icon("doesntexist"), None);
    }
}

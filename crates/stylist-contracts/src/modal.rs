#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalKind {
    Text,
    Image,
    Animation,
}

/// What the modal host shows. Replaced wholesale on every open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalPresentation {
    pub heading: String,
    pub body: String,
    pub kind: ModalKind,
}

impl ModalPresentation {
    pub fn text(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
            kind: ModalKind::Text,
        }
    }

    pub fn image(heading: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: data_url.into(),
            kind: ModalKind::Image,
        }
    }

    pub fn animation(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: String::new(),
            kind: ModalKind::Animation,
        }
    }

    /// Body as shown to the user; list asterisks in text bodies become bullets.
    pub fn rendered_body(&self) -> String {
        match self.kind {
            ModalKind::Text => self.body.replace('*', "•"),
            ModalKind::Image | ModalKind::Animation => self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_bodies_render_bullets() {
        let modal = ModalPresentation::text("Tips", "* bob\n* pixie");
        assert_eq!(modal.rendered_body(), "• bob\n• pixie");
    }

    #[test]
    fn image_bodies_are_left_alone() {
        let modal = ModalPresentation::image("Look", "data:image/png;base64,a*b");
        assert_eq!(modal.rendered_body(), "data:image/png;base64,a*b");
        assert!(ModalPresentation::animation("Before/After").body.is_empty());
    }
}

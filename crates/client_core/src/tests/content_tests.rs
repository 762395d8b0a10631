use super::*;

const ORIGIN: &str = "https://chat.example.com";

fn normalizer() -> ContentNormalizer {
    ContentNormalizer::new(ORIGIN).expect("normalizer")
}

fn assert_fixed_point(normalizer: &ContentNormalizer, output: &str) {
    assert_eq!(normalizer.normalize(Some(output), None), output);
}

#[test]
fn classifies_payload_shapes() {
    assert_eq!(
        classify(Some("<p>hi</p>"), Some("hi")),
        PayloadShape::Markup {
            source: "<p>hi</p>",
            escaped: false
        }
    );
    assert_eq!(
        classify(Some("&lt;p&gt;hi&lt;/p&gt;"), None),
        PayloadShape::Markup {
            source: "&lt;p&gt;hi&lt;/p&gt;",
            escaped: true
        }
    );
    assert_eq!(
        classify(None, Some("<b>bold</b>")),
        PayloadShape::Markup {
            source: "<b>bold</b>",
            escaped: false
        }
    );
    assert_eq!(classify(Some("   "), Some("just text")), PayloadShape::PlainText("just text"));
    assert_eq!(classify(None, None), PayloadShape::PlainText(""));
}

#[test]
fn escape_detection_requires_absence_of_literal_markup() {
    assert!(looks_escaped("&lt;div class=\"x\"&gt;"));
    assert!(looks_escaped("&lt;/p&gt;"));
    assert!(!looks_escaped("<p>&lt;p&gt; is a paragraph tag</p>"));
    assert!(!looks_escaped("1 &lt; 2"));
    assert!(!looks_escaped("&lt;script&gt;"));
}

#[test]
fn decodes_named_and_numeric_entities_in_one_pass() {
    assert_eq!(
        decode_entities("&lt;p&gt;&amp;lt;&#39;&#x41;&quot;&lt;/p&gt;"),
        "<p>&lt;'A\"</p>"
    );
    assert_eq!(decode_entities("&unknown; &#0;"), "&unknown; &#0;");
    assert!(matches!(decode_entities("plain"), Cow::Borrowed("plain")));
}

#[test]
fn script_payload_is_removed_with_its_content() {
    let normalizer = normalizer();
    let output = normalizer.normalize(None, Some("<script>alert(1)</script>hello"));

    assert_eq!(output, "hello");
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn event_handlers_and_unsafe_schemes_are_stripped() {
    let normalizer = normalizer();
    let output = normalizer.normalize(
        Some(r#"<p onclick="steal()" style="color:red">hi <a href="javascript:alert(1)">x</a></p>"#),
        None,
    );

    assert!(!output.contains("onclick"));
    assert!(!output.contains("javascript"));
    assert!(!output.contains("style"));
    assert!(output.starts_with("<p>hi "));
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn embedded_frames_never_survive() {
    let normalizer = normalizer();
    let output = normalizer.normalize(
        Some(r#"<div>before<iframe src="https://evil.example.org"></iframe><object data="x"></object>after</div>"#),
        None,
    );

    assert_eq!(output, "<div>beforeafter</div>");
}

#[test]
fn links_get_rel_and_absolute_targets() {
    let normalizer = normalizer();
    let output = normalizer.normalize(Some(r#"<p><a href="/#narrow/stream/1">jump</a></p>"#), None);

    assert!(output.contains(r#"href="https://chat.example.com/#narrow/stream/1""#));
    assert!(output.contains(r#"rel="noopener noreferrer""#));
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn relative_images_are_resolved_and_lazy() {
    let normalizer = normalizer();
    let output = normalizer.normalize(
        Some(r#"<p><img src="/user_uploads/2/ab/cat.png" alt="cat"></p>"#),
        None,
    );

    assert!(output.contains(r#"src="https://chat.example.com/user_uploads/2/ab/cat.png""#));
    assert!(output.contains(r#"loading="lazy""#));
    assert!(output.contains(r#"decoding="async""#));
    assert!(output.contains(r#"alt="cat""#));
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn same_origin_thumbnails_are_canonicalized() {
    let normalizer = normalizer();
    let output = normalizer.normalize(
        Some(r#"<img src="/user_uploads/thumbnail/2/ab/cat.png/840x560.webp">"#),
        None,
    );

    assert!(output.contains(r#"src="https://chat.example.com/user_uploads/2/ab/cat.png""#));
    assert!(!output.contains("thumbnail"));
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn foreign_thumbnails_are_left_alone() {
    let normalizer = normalizer();
    let src = "https://cdn.example.org/user_uploads/thumbnail/2/cat.png/840x560.webp";
    let output = normalizer.normalize(Some(&format!(r#"<img src="{src}">"#)), None);

    assert!(output.contains(src));
}

#[test]
fn full_size_url_maps_thumbnail_variants() {
    assert_eq!(
        full_size_url("https://chat.example.com/user_uploads/thumbnail/1/x/report.final.pdf/300x200.webp")
            .as_deref(),
        Some("https://chat.example.com/user_uploads/1/x/report.final.pdf")
    );
    assert_eq!(full_size_url("https://chat.example.com/user_uploads/1/x/cat.png"), None);
}

#[test]
fn escaped_rendered_markup_is_decoded_then_sanitized() {
    let normalizer = normalizer();
    let output = normalizer.normalize(
        Some("&lt;p&gt;Tom &amp;amp; Jerry&lt;/p&gt;&lt;script&gt;x()&lt;/script&gt;"),
        None,
    );

    assert_eq!(output, "<p>Tom &amp; Jerry</p>");
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn plain_text_is_escaped_into_a_preformatted_block() {
    let normalizer = normalizer();
    let output = normalizer.normalize(None, Some("\r\nif a < b && c > d {\r\n  go();\r}"));

    assert_eq!(
        output,
        "<pre class=\"plain-text\">if a &lt; b &amp;&amp; c &gt; d {\n  go();\n}</pre>"
    );
    assert_fixed_point(&normalizer, &output);
}

#[test]
fn escaped_looking_output_is_anchored() {
    let normalizer = normalizer();
    let output = normalizer.normalize(None, Some("<x-note>&lt;p&gt;</x-note>"));

    assert_eq!(output, "<span>&lt;p&gt;</span>");
    assert_fixed_point(&normalizer, &output);
}

const CRAFTED_INPUTS: &[(Option<&str>, Option<&str>)] = &[
    (Some("<ul><li>one</li><li>two &nbsp; three</li></ul>"), None),
    (Some("<table><tr><td colspan=\"2\">cell</td></tr></table>"), None),
    (Some("<blockquote><p>quoted</p></blockquote><hr>"), None),
    (None, Some("multi\nline\n\ntext with \"quotes\"")),
    (None, Some("&lt;strong&gt;bold&lt;/strong&gt;")),
    (Some("<div class=\"codehilite\"><pre><code>x &lt; y</code></pre></div>"), None),
    (None, Some("<script>alert(1)</script>")),
    (None, Some("<style>x{}</style>")),
    (Some("<script>alert(1)</script>   "), None),
    (Some("<iframe src=\"https://evil.example\">inside</iframe>"), None),
    (Some("<pre>\n\nfoo</pre>"), None),
    (Some("<pre>\nfoo</pre>"), None),
    (Some("<p>a</p>\n<pre class=\"code\">\n\n\nx\n</pre>"), None),
    (None, Some("&lt;pre&gt;\n\ncode&lt;/pre&gt;")),
    (Some("<a href=\"/a\"><a href=\"/b\">x</a></a>"), None),
    (Some("<table><tr><td>a</td></tr>stray <b>bold</b></table>"), None),
    (None, Some("&lt;p&gt;hi&lt;/p&gt;&lt;script&gt;alert(1)&lt;/script&gt;")),
    (None, Some("&lt;p onclick=&quot;x()&quot;&gt;hi&lt;/p&gt;")),
    (Some("<img src=\"x.png\" onerror=\"alert(1)\">"), None),
    (Some("<a href=\"javascript:alert(1)\">x</a>"), None),
    (Some("<div onclick=\"x()\" style=\"color:red\">hi</div>"), None),
    (Some("<svg><script>alert(1)</script></svg>"), None),
    (Some("<<script>script>alert(1)<</script>/script>"), None),
    (None, Some("")),
    (None, None),
];

#[test]
fn sanitized_away_markup_stays_non_blank() {
    let normalizer = normalizer();

    for raw in ["<script>alert(1)</script>", "<style>x{}</style>"] {
        let output = normalizer.normalize(None, Some(raw));
        assert_eq!(output, EMPTY_MARKUP);
        assert_fixed_point(&normalizer, &output);
    }
}

#[test]
fn leading_newline_in_pre_survives_reparsing() {
    let normalizer = normalizer();

    let output = normalizer.normalize(Some("<pre>\n\nfoo</pre>"), None);

    assert_eq!(output, "<pre>\n\nfoo</pre>");
    assert_fixed_point(&normalizer, &output);
    assert_eq!(normalizer.normalize(Some("<pre>\nfoo</pre>"), None), "<pre>foo</pre>");
}

#[test]
fn crafted_inputs_are_safe_fixed_points() {
    let normalizer = normalizer();
    let handler = Regex::new(r"(?i)\son[a-z]+\s*=").expect("handler pattern");

    for &(rendered, raw) in CRAFTED_INPUTS {
        let output = normalizer.normalize(rendered, raw);
        let lowered = output.to_ascii_lowercase();

        assert!(!output.trim().is_empty(), "{rendered:?} {raw:?} produced blank output");
        assert!(!lowered.contains("<script"), "{rendered:?} {raw:?} kept a script: {output}");
        assert!(!lowered.contains("<style"), "{rendered:?} {raw:?} kept a style: {output}");
        assert!(!lowered.contains("javascript:"), "{rendered:?} {raw:?} kept a js url: {output}");
        assert!(!handler.is_match(&output), "{rendered:?} {raw:?} kept a handler: {output}");
        assert_eq!(
            normalizer.normalize(Some(&output), None),
            output,
            "{rendered:?} {raw:?} is not a fixed point"
        );
    }
}

#[test]
fn resolves_avatar_urls_against_the_origin() {
    let normalizer = normalizer();

    assert_eq!(
        normalizer.resolve_asset_url("/avatar/12?s=50"),
        "https://chat.example.com/avatar/12?s=50"
    );
    assert_eq!(
        normalizer.resolve_asset_url("https://secure.gravatar.com/avatar/abc"),
        "https://secure.gravatar.com/avatar/abc"
    );
}

#[test]
fn rejects_invalid_origins() {
    assert!(matches!(
        ContentNormalizer::new("not a url"),
        Err(ClientError::Decode(_))
    ));
}

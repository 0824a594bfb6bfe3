mod pipeline {
	mod embedding;
	mod import;
	mod read;
	mod support;
	mod upload;
}
